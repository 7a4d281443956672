//! Watched-tree registry (C2): an in-memory model of which directories are
//! watched and what children they currently contain.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A single watched directory's known children, identified by basename.
#[derive(Debug, Default)]
pub struct WatchedDir {
    children: HashSet<String>,
}

impl WatchedDir {
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn has(&self, basename: &str) -> bool {
        self.children.contains(basename)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Mapping from absolute canonical path to [`WatchedDir`].
///
/// A directory enters the registry the first time any of its entries is
/// observed; it leaves when explicitly removed (by the removal engine or by
/// `close()`).
#[derive(Debug, Default)]
pub struct WatchRegistry {
    dirs: HashMap<PathBuf, WatchedDir>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or lazily create the entry for `dir`.
    pub fn get_or_create(&mut self, dir: &Path) -> &mut WatchedDir {
        self.dirs.entry(dir.to_path_buf()).or_default()
    }

    pub fn get(&self, dir: &Path) -> Option<&WatchedDir> {
        self.dirs.get(dir)
    }

    /// Record that `dir/child` exists. `.` and `..` are silently ignored.
    pub fn add(&mut self, dir: &Path, child: &str) {
        if child == "." || child == ".." {
            return;
        }
        self.dirs.entry(dir.to_path_buf()).or_default().children.insert(child.to_string());
    }

    pub fn has(&self, dir: &Path, child: &str) -> bool {
        self.dirs.get(dir).map(|d| d.has(child)).unwrap_or(false)
    }

    pub fn children(&self, dir: &Path) -> Vec<String> {
        self.dirs
            .get(dir)
            .map(|d| d.children().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Remove `dir/child` from the parent's child set. Returns `true` if the
    /// directory's child set became empty as a result (a caller-visible
    /// signal to probe for the directory's own existence).
    pub fn remove(&mut self, dir: &Path, child: &str) -> bool {
        if let Some(entry) = self.dirs.get_mut(dir) {
            entry.children.remove(child);
            return entry.children.is_empty();
        }
        false
    }

    /// Drop the registry entry for `dir` entirely (used once its own removal
    /// has been processed).
    pub fn drop_dir(&mut self, dir: &Path) {
        self.dirs.remove(dir);
    }

    pub fn contains_dir(&self, dir: &Path) -> bool {
        self.dirs.contains_key(dir)
    }

    pub fn watched_dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn clear(&mut self) {
        self.dirs.clear();
    }

    /// All registered directories, sorted, each paired with a sorted list of
    /// its children — the shape `getWatched()` returns.
    pub fn snapshot(&self) -> Vec<(PathBuf, Vec<String>)> {
        let mut out: Vec<(PathBuf, Vec<String>)> = self
            .dirs
            .iter()
            .map(|(dir, wd)| {
                let mut children: Vec<String> = wd.children().map(str::to_string).collect();
                children.sort();
                (dir.clone(), children)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Iteratively collect every directory at or beneath `root`, deepest
    /// first, so a caller can unwatch/remove a subtree without recursion
    /// (bounding stack depth on deep trees).
    pub fn subtree_dirs_deepest_first(&self, root: &Path) -> Vec<PathBuf> {
        let mut matches: Vec<PathBuf> =
            self.dirs.keys().filter(|d| d.starts_with(root)).cloned().collect();
        matches.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_track_emptiness() {
        let mut reg = WatchRegistry::new();
        let dir = PathBuf::from("/w");
        reg.add(&dir, "a.txt");
        reg.add(&dir, "b.txt");
        assert!(reg.has(&dir, "a.txt"));
        assert!(!reg.remove(&dir, "a.txt"));
        assert!(reg.remove(&dir, "b.txt"));
    }

    #[test]
    fn dot_and_dotdot_are_ignored() {
        let mut reg = WatchRegistry::new();
        let dir = PathBuf::from("/w");
        reg.add(&dir, ".");
        reg.add(&dir, "..");
        assert!(reg.get(&dir).map(|d| d.is_empty()).unwrap_or(true));
    }

    #[test]
    fn subtree_collection_is_deepest_first() {
        let mut reg = WatchRegistry::new();
        reg.get_or_create(Path::new("/w"));
        reg.get_or_create(Path::new("/w/d1"));
        reg.get_or_create(Path::new("/w/d1/d2"));
        let order = reg.subtree_dirs_deepest_first(Path::new("/w/d1"));
        assert_eq!(order, vec![PathBuf::from("/w/d1/d2"), PathBuf::from("/w/d1")]);
    }

    #[test]
    fn snapshot_is_sorted() {
        let mut reg = WatchRegistry::new();
        reg.add(Path::new("/w"), "b");
        reg.add(Path::new("/w"), "a");
        let snap = reg.snapshot();
        assert_eq!(snap, vec![(PathBuf::from("/w"), vec!["a".to_string(), "b".to_string()])]);
    }
}
