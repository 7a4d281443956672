//! Throttler (C4): suppresses duplicate actions for the same (action, path)
//! within a window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Change,
    Remove,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// First call for this (action, path); the window is now live.
    First,
    /// A duplicate arrived while the window was live. `count` is the number
    /// of suppressed duplicates so far, observable for diagnostics.
    Suppressed { count: u32 },
}

struct ThrottleEntry {
    deadline: Instant,
    count: u32,
}

/// Per (action, path) debounce table.
///
/// Entries expire lazily: a stale entry is treated as absent the next time
/// the same key is checked, rather than relying on a background timer task,
/// since the core's single-writer actor loop only ever needs the answer at
/// the moment a new event arrives.
#[derive(Default)]
pub struct Throttler {
    entries: HashMap<(Action, PathBuf), ThrottleEntry>,
}

impl Throttler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throttle(
        &mut self,
        action: Action,
        path: &Path,
        window: Duration,
        now: Instant,
    ) -> ThrottleDecision {
        let key = (action, path.to_path_buf());
        match self.entries.get_mut(&key) {
            Some(entry) if entry.deadline > now => {
                entry.count += 1;
                ThrottleDecision::Suppressed { count: entry.count }
            }
            _ => {
                self.entries.insert(key, ThrottleEntry { deadline: now + window, count: 0 });
                ThrottleDecision::First
            }
        }
    }

    /// Drop expired entries. Purely a memory-bound housekeeping step; does
    /// not affect throttling decisions since lookups already treat expired
    /// entries as absent.
    pub fn sweep(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.deadline > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_is_never_suppressed() {
        let mut t = Throttler::new();
        let now = Instant::now();
        let d = t.throttle(Action::Change, Path::new("/w/a"), Duration::from_millis(50), now);
        assert_eq!(d, ThrottleDecision::First);
    }

    #[test]
    fn duplicate_within_window_is_suppressed_and_counted() {
        let mut t = Throttler::new();
        let now = Instant::now();
        t.throttle(Action::Change, Path::new("/w/a"), Duration::from_millis(50), now);
        let d1 = t.throttle(
            Action::Change,
            Path::new("/w/a"),
            Duration::from_millis(50),
            now + Duration::from_millis(10),
        );
        assert_eq!(d1, ThrottleDecision::Suppressed { count: 1 });
        let d2 = t.throttle(
            Action::Change,
            Path::new("/w/a"),
            Duration::from_millis(50),
            now + Duration::from_millis(20),
        );
        assert_eq!(d2, ThrottleDecision::Suppressed { count: 2 });
    }

    #[test]
    fn call_after_window_expires_resets() {
        let mut t = Throttler::new();
        let now = Instant::now();
        t.throttle(Action::Change, Path::new("/w/a"), Duration::from_millis(50), now);
        let d = t.throttle(
            Action::Change,
            Path::new("/w/a"),
            Duration::from_millis(50),
            now + Duration::from_millis(60),
        );
        assert_eq!(d, ThrottleDecision::First);
    }

    #[test]
    fn different_actions_are_independent() {
        let mut t = Throttler::new();
        let now = Instant::now();
        t.throttle(Action::Change, Path::new("/w/a"), Duration::from_millis(50), now);
        let d = t.throttle(Action::Remove, Path::new("/w/a"), Duration::from_millis(100), now);
        assert_eq!(d, ThrottleDecision::First);
    }
}
