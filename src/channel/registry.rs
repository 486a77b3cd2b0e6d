use std::sync::{Mutex, MutexGuard};

use indexmap::IndexSet;

/// Document ids the session wants events for. Shared between the
/// subscription handle and the connection task; replayed on every reconnect.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    ids: Mutex<IndexSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, IndexSet<String>> {
        // A panic while holding the lock cannot leave the set half-written.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false if the id was already registered.
    pub fn insert(&self, document_id: &str) -> bool {
        self.guard().insert(document_id.to_string())
    }

    pub fn remove(&self, document_id: &str) -> bool {
        self.guard().shift_remove(document_id)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.guard().contains(document_id)
    }

    /// Registered ids in subscription order.
    pub fn ids(&self) -> Vec<String> {
        self.guard().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

/// Listener generation bookkeeping. Each connection attaches a new
/// generation; frames tagged with any other generation are stale.
#[derive(Debug, Default)]
pub struct ListenerSlot {
    next: u64,
    current: Option<u64>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach whatever is attached and attach a fresh generation.
    pub fn attach(&mut self) -> u64 {
        self.detach();
        self.next += 1;
        self.current = Some(self.next);
        self.next
    }

    pub fn detach(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current == Some(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.insert("a"));
        assert!(!registry.insert("a"));
        assert!(registry.insert("b"));
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }

    #[test]
    fn removed_ids_are_not_replayed() {
        let registry = SubscriptionRegistry::new();
        registry.insert("a");
        registry.insert("b");
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert_eq!(registry.ids(), vec!["b"]);
        assert!(!registry.contains("a"));
    }

    #[test]
    fn attach_supersedes_previous_generation() {
        let mut slot = ListenerSlot::new();
        let first = slot.attach();
        let second = slot.attach();
        assert_eq!((first, second), (1, 2));
        assert!(!slot.is_current(first));
        assert!(slot.is_current(second));
    }

    #[test]
    fn detached_slot_accepts_nothing() {
        let mut slot = ListenerSlot::new();
        let generation = slot.attach();
        slot.detach();
        assert!(!slot.is_current(generation));
        assert_eq!(slot.current(), None);
    }
}
