use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong building or driving a [`crate::Watcher`].
///
/// Programmer errors are returned synchronously from `add`/`unwatch`;
/// everything else is delivered on the `error` event channel.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch path must be a non-empty string, got {0:?}")]
    InvalidPath(String),

    #[error("unknown watch option: {0}")]
    UnknownOption(String),

    #[error("backend failed to watch {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WatchError>;
