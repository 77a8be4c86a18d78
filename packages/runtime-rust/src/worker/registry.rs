use std::sync::Arc;

use dashmap::DashMap;
use offload_core::messages::ModuleInfo;
use parking_lot::RwLock;

use super::module::DispatchTarget;

// ---------------------------------------------------------------------------
// ModuleRegistry
// ---------------------------------------------------------------------------

/// Registry of named modules owned by the dispatcher.
///
/// Re-registering a name replaces the previous module in place and keeps its
/// original position in the listing order, so late-bound modules can be
/// hot-swapped.
pub struct ModuleRegistry {
    by_name: DashMap<String, Arc<dyn DispatchTarget>>,
    /// Registration order for deterministic listings.
    order: RwLock<Vec<String>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers `target` under `name`. Returns `true` if an existing module
    /// was replaced.
    pub fn register(&self, name: impl Into<String>, target: Arc<dyn DispatchTarget>) -> bool {
        let name = name.into();
        let replaced = self.by_name.insert(name.clone(), target).is_some();
        if !replaced {
            self.order.write().push(name);
        }
        replaced
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DispatchTarget>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn listing(&self) -> Vec<ModuleInfo> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let target = self.get(&name)?;
                Some(ModuleInfo {
                    module_name: target.module_name().to_string(),
                    name,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::module::BoundHandler;

    /// Minimal target that only reports a name.
    struct Named(&'static str);

    impl DispatchTarget for Named {
        fn module_name(&self) -> &str {
            self.0
        }

        fn handler_names(&self) -> Vec<String> {
            Vec::new()
        }

        fn bind(&self, _handler_name: &str) -> Option<BoundHandler> {
            None
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.register("http", Arc::new(Named("HttpModule"))));

        assert!(registry.contains("http"));
        assert_eq!(registry.get("http").unwrap().module_name(), "HttpModule");
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn names_follow_registration_order() {
        let registry = ModuleRegistry::new();
        registry.register("storage", Arc::new(Named("storage")));
        registry.register("http", Arc::new(Named("http")));
        registry.register("crypto", Arc::new(Named("crypto")));
        assert_eq!(registry.names(), vec!["storage", "http", "crypto"]);
    }

    #[test]
    fn duplicate_name_overwrites_in_place() {
        let registry = ModuleRegistry::new();
        registry.register("http", Arc::new(Named("v1")));
        registry.register("realtime", Arc::new(Named("rt")));
        assert!(registry.register("http", Arc::new(Named("v2"))));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["http", "realtime"]);
        assert_eq!(registry.get("http").unwrap().module_name(), "v2");
    }

    #[test]
    fn listing_pairs_registered_and_reported_names() {
        let registry = ModuleRegistry::new();
        registry.register("bg", Arc::new(Named("BackgroundModule")));
        let listing = registry.listing();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "bg");
        assert_eq!(listing[0].module_name, "BackgroundModule");
    }
}
