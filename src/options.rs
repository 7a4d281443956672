use std::env;
use std::time::Duration;

/// Configuration frozen at [`crate::Watcher::new`] time.
///
/// Field-for-field Rust shape of the public configuration surface. Defaults
/// mirror the upstream chokidar options exactly; `extensions` and `name` are
/// an additional narrowing filter that composes with the ignore set rather
/// than replacing it.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub persistent: bool,
    pub ignore_initial: bool,
    pub ignore_permission_errors: bool,
    pub interval: Duration,
    pub binary_interval: Duration,
    pub disable_globbing: bool,
    pub use_fs_events: Option<bool>,
    pub use_polling: bool,
    pub atomic: AtomicOption,
    pub follow_symlinks: bool,
    pub await_write_finish: Option<AwaitWriteFinish>,
    pub ignored: Vec<String>,
    pub cwd: Option<std::path::PathBuf>,
    pub always_stat: bool,
    /// File extensions (without the dot) to restrict matches to. Empty means all.
    pub extensions: Vec<String>,
    /// Label used in log lines, e.g. `"file watcher started for {name}"`.
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
pub enum AtomicOption {
    Auto,
    Enabled,
    Disabled,
    Window(Duration),
}

impl AtomicOption {
    /// Resolve against whether the chosen backend is the recursive one.
    pub fn window(self, recursive_backend: bool, polling: bool) -> Option<Duration> {
        match self {
            AtomicOption::Disabled => None,
            AtomicOption::Window(d) => Some(d),
            AtomicOption::Enabled => Some(Duration::from_millis(100)),
            AtomicOption::Auto => {
                if !polling && !recursive_backend {
                    Some(Duration::from_millis(100))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AwaitWriteFinish {
    pub stability_threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for AwaitWriteFinish {
    fn default() -> Self {
        Self {
            stability_threshold: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            ignore_initial: false,
            ignore_permission_errors: false,
            interval: Duration::from_millis(100),
            binary_interval: Duration::from_millis(300),
            disable_globbing: false,
            use_fs_events: None,
            use_polling: false,
            atomic: AtomicOption::Auto,
            follow_symlinks: true,
            await_write_finish: None,
            ignored: Vec::new(),
            cwd: None,
            always_stat: false,
            extensions: Vec::new(),
            name: "watcher".to_string(),
        }
    }
}

impl WatchOptions {
    /// Apply `CHOKIDAR_USEPOLLING` / `CHOKIDAR_INTERVAL` on top of caller
    /// supplied options, the same way the original environment overrides
    /// apply after construction but before the configuration is frozen.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = env::var("CHOKIDAR_USEPOLLING") {
            self.use_polling = parse_chokidar_bool(&val, self.use_polling);
        }
        if let Ok(val) = env::var("CHOKIDAR_INTERVAL") {
            if let Ok(ms) = val.parse::<u64>() {
                self.interval = Duration::from_millis(ms);
            }
        }
        self
    }
}

/// `true`/`1` -> true, `false`/`0` -> false, any other non-empty value ->
/// true by coercion. Kept intentionally rather than "fixed" to match
/// upstream's documented env-var parsing quirk.
fn parse_chokidar_bool(val: &str, default: bool) -> bool {
    match val {
        "true" | "1" => true,
        "false" | "0" => false,
        "" => default,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chokidar_bool_coerces_unknown_values_truthy() {
        assert!(parse_chokidar_bool("yes", false));
        assert!(parse_chokidar_bool("true", false));
        assert!(!parse_chokidar_bool("false", true));
        assert!(parse_chokidar_bool("0garbage", false));
        assert!(!parse_chokidar_bool("0", true));
        assert_eq!(parse_chokidar_bool("", true), true);
    }

    #[test]
    fn atomic_auto_enabled_only_for_non_polling_non_recursive() {
        assert!(AtomicOption::Auto.window(false, false).is_some());
        assert!(AtomicOption::Auto.window(true, false).is_none());
        assert!(AtomicOption::Auto.window(false, true).is_none());
    }
}
