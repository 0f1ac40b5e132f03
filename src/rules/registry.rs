use std::sync::{Arc, PoisonError, RwLock};

use crate::rules::RuleSnapshot;

/// Holds the current snapshot behind an atomically swappable reference.
///
/// Readers clone the `Arc` under a read lock held only for the clone, so a
/// check never blocks on a reload and always sees exactly one published
/// snapshot. Publishes are serialized by the write lock; the last writer to
/// complete wins. A poisoned lock is recovered via `into_inner` — the guarded
/// value is a plain pointer and is always consistent.
#[derive(Debug)]
pub struct SnapshotRegistry {
    current: RwLock<Arc<RuleSnapshot>>,
}

impl SnapshotRegistry {
    pub fn new(initial: RuleSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// The latest published snapshot. Non-blocking, never empty after
    /// bootstrap. Callers keep the returned `Arc` for the duration of one
    /// decision, not across it.
    pub fn current(&self) -> Arc<RuleSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a freshly loaded snapshot. All-or-nothing: every subsequent
    /// `current()` call sees the new set of profiles and users together.
    pub fn publish(&self, snapshot: RuleSnapshot) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }
}
