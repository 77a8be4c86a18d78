/// Generates a fresh operation id.
///
/// Ids are UUID v4 strings, unique across processes as well as within one.
#[must_use]
pub fn generate_operation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let ids: HashSet<String> = (0..1_000).map(|_| generate_operation_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
