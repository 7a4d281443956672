//! Atomic-save reconciler (C6): many editors and `rename(2)`-based save
//! routines produce an `unlink` immediately followed by an `add` of the same
//! path. Left alone that surfaces as delete-then-create; this module holds
//! each `unlink` open for a short window so a same-path `add` arriving
//! inside it gets rewritten into a single `change`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct PendingUnlink {
    generation: u64,
}

#[derive(Default)]
pub struct AtomicReconciler {
    pending: HashMap<PathBuf, PendingUnlink>,
    next_generation: u64,
}

impl AtomicReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Open a reconciliation window for `path`, returning the generation the
    /// caller must schedule its expiry timer against.
    pub fn record_unlink(&mut self, path: &Path) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending.insert(path.to_path_buf(), PendingUnlink { generation });
        generation
    }

    /// An `add` arrived for `path`. If an unlink window is open, consume it
    /// and report that the pair should be reconciled into a single `change`.
    pub fn try_reconcile_add(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// The expiry timer for `(path, generation)` fired. Returns `true` if the
    /// window was still open under that same generation, meaning the unlink
    /// should now be released as a real `unlink` event. A mismatched or
    /// already-consumed generation means the timer is stale and self-retires.
    pub fn expire(&mut self, path: &Path, generation: u64) -> bool {
        match self.pending.get(path) {
            Some(p) if p.generation == generation => {
                self.pending.remove(path);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_within_window_reconciles() {
        let mut r = AtomicReconciler::new();
        r.record_unlink(Path::new("/w/a.txt"));
        assert!(r.try_reconcile_add(Path::new("/w/a.txt")));
        assert!(!r.is_pending(Path::new("/w/a.txt")));
    }

    #[test]
    fn add_without_prior_unlink_does_not_reconcile() {
        let mut r = AtomicReconciler::new();
        assert!(!r.try_reconcile_add(Path::new("/w/a.txt")));
    }

    #[test]
    fn expiry_releases_real_unlink_when_untouched() {
        let mut r = AtomicReconciler::new();
        let g = r.record_unlink(Path::new("/w/a.txt"));
        assert!(r.expire(Path::new("/w/a.txt"), g));
        assert!(!r.is_pending(Path::new("/w/a.txt")));
    }

    #[test]
    fn stale_expiry_after_reconcile_is_noop() {
        let mut r = AtomicReconciler::new();
        let g = r.record_unlink(Path::new("/w/a.txt"));
        assert!(r.try_reconcile_add(Path::new("/w/a.txt")));
        assert!(!r.expire(Path::new("/w/a.txt"), g));
    }

    #[test]
    fn stale_expiry_after_new_unlink_is_noop() {
        let mut r = AtomicReconciler::new();
        let g1 = r.record_unlink(Path::new("/w/a.txt"));
        assert!(r.expire(Path::new("/w/a.txt"), g1));
        let g2 = r.record_unlink(Path::new("/w/a.txt"));
        assert_ne!(g1, g2);
        assert!(!r.expire(Path::new("/w/a.txt"), g1));
        assert!(r.is_pending(Path::new("/w/a.txt")));
    }
}
