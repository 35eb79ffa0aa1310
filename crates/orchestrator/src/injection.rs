//! Consultant output waiting to be injected into the next turn.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// At most one pending block per consultant. Reading drains everything, so
/// a block is delivered exactly once; a newer output for the same consultant
/// replaces an unread one.
#[derive(Debug, Default)]
pub struct InjectionCache {
    pending: Mutex<BTreeMap<String, String>>,
}

impl InjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, consultant: impl Into<String>, block: impl Into<String>) {
        self.lock().insert(consultant.into(), block.into());
    }

    /// Every pending block, ordered by consultant name, leaving the cache empty.
    pub fn take_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock()).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_exactly_once() {
        let cache = InjectionCache::new();
        cache.store("b", "[b/p: 2]");
        cache.store("a", "[a/p: 1]");

        assert_eq!(cache.take_all(), vec!["[a/p: 1]", "[b/p: 2]"]);
        assert!(cache.take_all().is_empty());
    }

    #[test]
    fn newer_output_overwrites_stale_entry() {
        let cache = InjectionCache::new();
        cache.store("a", "old");
        cache.store("a", "new");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take_all(), vec!["new"]);
    }
}
