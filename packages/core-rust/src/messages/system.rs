//! Reserved system module vocabulary and its payload shapes.

use serde::{Deserialize, Serialize};

/// Module name that routes a request to the dispatcher's own handlers.
pub const SYSTEM_MODULE: &str = "SYSTEM";

/// Id of the readiness announcement the worker emits when it comes up.
pub const INIT_ID: &str = "init";

/// Operations understood by the system module.
pub mod system_ops {
    pub const GET_HEALTH: &str = "getHealth";
    pub const LIST_MODULES: &str = "listModules";
    pub const REGISTER_MODULE: &str = "registerModule";
    /// Drains in-flight work and stops accepting requests.
    pub const DISPOSE: &str = "dispose";
}

/// Counters reported alongside health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub total_operations: u64,
    pub uptime_ms: u64,
}

/// Payload of a successful `getHealth` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub is_healthy: bool,
    pub active_operations: usize,
    pub registered_modules: Vec<String>,
    #[serde(default)]
    pub metrics: HealthMetrics,
}

/// One entry of a `listModules` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    /// Name the module is registered under.
    pub name: String,
    /// Name the module reports for itself.
    pub module_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleListing {
    pub modules: Vec<ModuleInfo>,
}

/// Request payload of `registerModule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterModulePayload {
    pub module_name: String,
    pub script_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterModuleAck {
    pub registered: String,
}

/// Payload of the SYSTEM envelope sent under [`INIT_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitAnnouncement {
    pub status: String,
    pub modules: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn health_report_wire_shape() {
        let report = HealthReport {
            is_healthy: true,
            active_operations: 2,
            registered_modules: vec!["http".to_string()],
            metrics: HealthMetrics {
                total_operations: 7,
                uptime_ms: 1_000,
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["isHealthy"], true);
        assert_eq!(value["activeOperations"], 2);
        assert_eq!(value["registeredModules"][0], "http");
        assert_eq!(value["metrics"]["totalOperations"], 7);
        assert_eq!(value["metrics"]["uptimeMs"], 1_000);
    }

    #[test]
    fn register_payload_reads_camel_case() {
        let payload: RegisterModulePayload = serde_json::from_value(json!({
            "moduleName": "crypto",
            "scriptPath": "modules/crypto.wasm"
        }))
        .unwrap();
        assert_eq!(payload.module_name, "crypto");
        assert_eq!(payload.script_path, "modules/crypto.wasm");
    }
}
