use crate::error::RegistryError;
use crate::model::ConnHandle;
use std::collections::{HashMap, HashSet};

/// Bidirectional index between live connections and the identities they
/// speak for. An identity key exists only while its connection set is
/// non-empty.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_handle: HashMap<ConnHandle, String>,
    by_identity: HashMap<String, HashSet<ConnHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(
        &mut self,
        handle: ConnHandle,
        identity: &str,
    ) -> Result<(), RegistryError> {
        if self.by_handle.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        self.by_handle.insert(handle, identity.to_string());
        self.by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(handle);
        Ok(())
    }

    /// Returns the identity only when `handle` was its last connection.
    pub fn remove_connection(&mut self, handle: ConnHandle) -> Option<String> {
        let identity = self.by_handle.remove(&handle)?;
        let set = self.by_identity.get_mut(&identity)?;
        set.remove(&handle);
        if set.is_empty() {
            self.by_identity.remove(&identity);
            return Some(identity);
        }
        None
    }

    pub fn identity_of(&self, handle: ConnHandle) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    pub fn connection_count_for(&self, identity: &str) -> usize {
        self.by_identity.get(identity).map_or(0, HashSet::len)
    }

    pub fn all_handles(&self) -> Vec<ConnHandle> {
        let mut handles: Vec<_> = self.by_handle.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn all_handles_except(&self, handle: ConnHandle) -> Vec<ConnHandle> {
        let mut handles = self.all_handles();
        handles.retain(|candidate| *candidate != handle);
        handles
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.by_identity.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_indexes_both_directions() {
        let mut registry = ConnectionRegistry::new();
        registry.add_connection(ConnHandle(1), "u1").expect("add");
        registry.add_connection(ConnHandle(2), "u1").expect("add");
        registry.add_connection(ConnHandle(3), "u2").expect("add");

        assert_eq!(registry.identity_of(ConnHandle(2)), Some("u1"));
        assert_eq!(registry.connection_count_for("u1"), 2);
        assert_eq!(registry.connection_count_for("u2"), 1);
        assert_eq!(registry.connection_count_for("nobody"), 0);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.identities(), vec!["u1", "u2"]);
    }

    #[test]
    fn duplicate_handle_is_rejected_without_mutation() {
        let mut registry = ConnectionRegistry::new();
        registry.add_connection(ConnHandle(1), "u1").expect("add");
        assert_eq!(
            registry.add_connection(ConnHandle(1), "u2"),
            Err(RegistryError::DuplicateHandle(ConnHandle(1)))
        );
        assert_eq!(registry.identity_of(ConnHandle(1)), Some("u1"));
        assert_eq!(registry.connection_count_for("u2"), 0);
    }

    #[test]
    fn remove_reports_identity_only_for_last_connection() {
        let mut registry = ConnectionRegistry::new();
        registry.add_connection(ConnHandle(1), "u1").expect("add");
        registry.add_connection(ConnHandle(2), "u1").expect("add");

        assert_eq!(registry.remove_connection(ConnHandle(1)), None);
        assert_eq!(registry.connection_count_for("u1"), 1);
        assert_eq!(
            registry.remove_connection(ConnHandle(2)),
            Some("u1".to_string())
        );
        assert!(registry.identities().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn removing_unknown_handle_is_noop() {
        let mut registry = ConnectionRegistry::new();
        registry.add_connection(ConnHandle(1), "u1").expect("add");
        assert_eq!(registry.remove_connection(ConnHandle(9)), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_handles_except_is_sorted_and_excludes() {
        let mut registry = ConnectionRegistry::new();
        for (id, identity) in [(5, "a"), (2, "b"), (9, "a"), (1, "c")] {
            registry.add_connection(ConnHandle(id), identity).expect("add");
        }
        assert_eq!(
            registry.all_handles_except(ConnHandle(9)),
            vec![ConnHandle(1), ConnHandle(2), ConnHandle(5)]
        );
        assert_eq!(registry.all_handles().len(), 4);
    }
}
