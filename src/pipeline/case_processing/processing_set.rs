//! Processing set: document ids awaiting a terminal event.
//!
//! Membership is the only record of "in flight". Nothing here blocks; ids are
//! added when the intake API accepts an upload and removed by `completed` or
//! `failed`.

use indexmap::IndexSet;

#[derive(Debug, Clone, Default)]
pub struct ProcessingSet {
    ids: IndexSet<String>,
}

impl ProcessingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted upload. Returns false if the id was already tracked.
    pub fn register_upload(&mut self, document_id: &str) -> bool {
        self.ids.insert(document_id.to_string())
    }

    /// Remove on a terminal event. Returns false (no-op) for unknown ids.
    pub fn complete_or_fail(&mut self, document_id: &str) -> bool {
        self.ids.shift_remove(document_id)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.ids.contains(document_id)
    }

    /// Gate for batch-completion side effects.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_set_is_empty() {
        let set = ProcessingSet::new();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn empties_only_after_last_resolves() {
        let mut set = ProcessingSet::new();
        for id in ["a", "b", "c"] {
            assert!(set.register_upload(id));
        }
        assert!(set.complete_or_fail("b"));
        assert!(!set.is_empty());
        assert!(set.complete_or_fail("a"));
        assert!(!set.is_empty());
        assert!(set.complete_or_fail("c"));
        assert!(set.is_empty());
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let mut set = ProcessingSet::new();
        set.register_upload("a");
        assert!(!set.complete_or_fail("zzz"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn double_registration_is_idempotent() {
        let mut set = ProcessingSet::new();
        assert!(set.register_upload("a"));
        assert!(!set.register_upload("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn ids_keep_registration_order_after_removal() {
        let mut set = ProcessingSet::new();
        for id in ["a", "b", "c"] {
            set.register_upload(id);
        }
        set.complete_or_fail("b");
        let ids: Vec<&str> = set.ids().collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
