//! Ignore filter (C3): evaluates whether a path is excluded, given
//! user-supplied patterns, runtime-learned exclusions (negations and
//! `unwatch`), and an optional editor-temp regex for atomic-save detection.

use std::fs::Metadata;
use std::path::Path;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// A user-supplied ignore source: either a glob pattern or an arbitrary
/// predicate over `(path, stat)` — patterns may be either plain globs or
/// predicates receiving both.
#[derive(Clone)]
pub enum IgnorePattern {
    Glob(String),
    Predicate(Arc<dyn Fn(&Path, Option<&Metadata>) -> bool + Send + Sync>),
}

impl std::fmt::Debug for IgnorePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnorePattern::Glob(g) => write!(f, "Glob({g:?})"),
            IgnorePattern::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Basename patterns recognized as editor atomic-save sidecar files.
const EDITOR_TEMP_GLOBS: &[&str] = &["**/.*.swp", "**/*~", "**/.subl*.tmp", "**/.goutputstream-*"];

pub struct IgnoreSet {
    user_patterns: Vec<IgnorePattern>,
    runtime_learned: Vec<String>,
    atomic_save_detection: bool,
    cached: Option<GlobSet>,
}

impl IgnoreSet {
    pub fn new(user_patterns: Vec<IgnorePattern>, atomic_save_detection: bool) -> Self {
        Self { user_patterns, runtime_learned: Vec::new(), atomic_save_detection, cached: None }
    }

    /// Record a runtime-learned exclusion (from a `!`-prefixed add or an
    /// `unwatch`), and its `/**` directory-prefix form, invalidating the
    /// cached matcher.
    pub fn learn(&mut self, path: &str) {
        self.runtime_learned.push(path.to_string());
        self.runtime_learned.push(format!("{path}/**"));
        self.cached = None;
    }

    /// Undo a previously learned exclusion (both the bare and `/**` forms),
    /// used when a positive `add` de-ignores a path that had been negated.
    pub fn unlearn(&mut self, path: &str) {
        let suffixed = format!("{path}/**");
        self.runtime_learned.retain(|p| p != path && p != &suffixed);
        self.cached = None;
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    fn build(&self) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.runtime_learned {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            }
        }
        for pattern in &self.user_patterns {
            if let IgnorePattern::Glob(g) = pattern {
                if let Ok(glob) = Glob::new(g) {
                    builder.add(glob);
                }
                // user-patterns-with-`/**`-suffix for directory-prefix matching
                if let Ok(glob) = Glob::new(&format!("{g}/**")) {
                    builder.add(glob);
                }
            }
        }
        if self.atomic_save_detection {
            for pattern in EDITOR_TEMP_GLOBS {
                if let Ok(glob) = Glob::new(pattern) {
                    builder.add(glob);
                }
            }
        }
        builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
    }

    fn matcher(&mut self) -> &GlobSet {
        if self.cached.is_none() {
            self.cached = Some(self.build());
        }
        self.cached.as_ref().unwrap()
    }

    /// Composite matcher first (covers editor-temp basenames, user globs,
    /// and runtime-learned exclusions), then any predicate patterns.
    pub fn is_ignored(&mut self, path: &Path, stat: Option<&Metadata>) -> bool {
        if self.matcher().is_match(path) {
            return true;
        }
        self.user_patterns.iter().any(|pattern| match pattern {
            IgnorePattern::Predicate(f) => f(path, stat),
            IgnorePattern::Glob(_) => false,
        })
    }
}
