//! Write-stabilization monitor (C5): bookkeeping for files the engine is
//! waiting to stop growing before releasing their `add`/`change` event.
//!
//! The actual polling (stat calls, timer scheduling) lives in the engine
//! actor, since it needs async I/O and the configured thresholds. This
//! module is the state machine described in the design notes: "cancellation
//! deletes the record and disarms the timer; the next poll that finds the
//! record gone self-retires" — realized here with a generation counter
//! rather than an actual abortable timer handle, so a stale scheduled poll
//! recognizes itself as stale without needing to reach across task
//! boundaries to cancel anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWriteOrigin {
    Add,
    Change,
}

#[derive(Debug)]
pub struct PendingWrite {
    pub last_change: Instant,
    pub generation: u64,
    pub origin: PendingWriteOrigin,
    pub last_size: Option<u64>,
}

#[derive(Default)]
pub struct WriteStabilizer {
    pending: HashMap<PathBuf, PendingWrite>,
    next_generation: u64,
}

impl WriteStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    /// Record activity for `path`. Returns `Some(generation)` the first time
    /// (the caller must schedule a poll chain for this generation); returns
    /// `None` when it just refreshed an already-pending record (no second
    /// poll chain needed).
    pub fn touch(&mut self, path: &Path, now: Instant, origin: PendingWriteOrigin) -> Option<u64> {
        if let Some(pw) = self.pending.get_mut(path) {
            pw.last_change = now;
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending.insert(
            path.to_path_buf(),
            PendingWrite { last_change: now, generation, origin, last_size: None },
        );
        Some(generation)
    }

    /// Look up the record for a scheduled poll, only if it's still the same
    /// generation that scheduled it (otherwise the poll is stale and should
    /// self-retire without doing anything).
    pub fn current(&self, path: &Path, generation: u64) -> Option<&PendingWrite> {
        self.pending.get(path).filter(|pw| pw.generation == generation)
    }

    pub fn record_size(&mut self, path: &Path, generation: u64, size: u64, now: Instant) {
        if let Some(pw) = self.pending.get_mut(path) {
            if pw.generation != generation {
                return;
            }
            if pw.last_size != Some(size) {
                pw.last_size = Some(size);
                pw.last_change = now;
            }
        }
    }

    /// Drop the record once the write has stabilized or the file vanished.
    pub fn settle(&mut self, path: &Path) -> Option<PendingWrite> {
        self.pending.remove(path)
    }

    /// C10 step 6: cancel a pending write during removal, returning its
    /// origin so the caller can decide whether to short-circuit emission.
    pub fn cancel(&mut self, path: &Path) -> Option<PendingWriteOrigin> {
        self.pending.remove(path).map(|pw| pw.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_touch_returns_generation_second_does_not() {
        let mut s = WriteStabilizer::new();
        let now = Instant::now();
        let g1 = s.touch(Path::new("/w/big"), now, PendingWriteOrigin::Add);
        assert!(g1.is_some());
        let g2 = s.touch(Path::new("/w/big"), now, PendingWriteOrigin::Add);
        assert!(g2.is_none());
    }

    #[test]
    fn stale_generation_is_not_current() {
        let mut s = WriteStabilizer::new();
        let now = Instant::now();
        let g = s.touch(Path::new("/w/big"), now, PendingWriteOrigin::Add).unwrap();
        s.settle(Path::new("/w/big"));
        let g2 = s.touch(Path::new("/w/big"), now, PendingWriteOrigin::Add).unwrap();
        assert_ne!(g, g2);
        assert!(s.current(Path::new("/w/big"), g).is_none());
        assert!(s.current(Path::new("/w/big"), g2).is_some());
    }

    #[test]
    fn cancel_returns_origin() {
        let mut s = WriteStabilizer::new();
        let now = Instant::now();
        s.touch(Path::new("/w/new"), now, PendingWriteOrigin::Add);
        assert_eq!(s.cancel(Path::new("/w/new")), Some(PendingWriteOrigin::Add));
        assert!(!s.is_pending(Path::new("/w/new")));
    }
}
