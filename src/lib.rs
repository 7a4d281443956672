//! A chokidar-style filesystem watcher: glob-aware roots, a three-source
//! ignore set, change/remove throttling, write-stabilization, and
//! atomic-save reconciliation, dispatched over a pluggable backend.
//!
//! ```no_run
//! # async fn run() -> Result<(), devenv_file_watcher::WatchError> {
//! let watcher = devenv_file_watcher::Watcher::new(Default::default());
//! let mut changes = watcher.subscribe_change();
//! watcher.add(vec!["src/**/*.rs".to_string()]).await?;
//! while let Ok(event) = changes.recv().await {
//!     println!("changed: {}", event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backend;
mod engine;
mod error;
mod event;
mod ignore;
mod options;
mod path_glob;
mod registry;
mod stabilize;
mod throttle;

pub use error::{Result, WatchError};
pub use event::{FsEvent, Notification};
pub use options::{AtomicOption, AwaitWriteFinish, WatchOptions};

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use engine::Command;
use event::Subscribers;

/// A cloneable handle to a running watcher. Cloning shares the same
/// underlying actor and subscriber channels; dropping the last clone does
/// not stop the actor — call [`Watcher::close`] explicitly.
#[derive(Clone)]
pub struct Watcher {
    cmd_tx: mpsc::Sender<Command>,
    subscribers: Subscribers,
}

impl Watcher {
    /// Spawn the watcher actor with the given options and apply any
    /// `CHOKIDAR_*` environment overrides on top of them.
    pub fn new(options: WatchOptions) -> Self {
        let options = options.with_env_overrides();
        let (cmd_tx, subscribers) = engine::spawn(options);
        Self { cmd_tx, subscribers }
    }

    /// Begin watching one or more paths or globs. Accepts a leading `!` on
    /// an entry to negate (ignore) it instead of watching it.
    pub async fn add(&self, paths: Vec<String>) -> Result<()> {
        let (reply, recv) = oneshot::channel();
        self.cmd_tx
            .send(Command::Add { paths, reply })
            .await
            .map_err(|_| WatchError::Closed)?;
        recv.await.map_err(|_| WatchError::Closed)?
    }

    /// Stop watching one or more paths, recursively retiring every tracked
    /// directory beneath them and emitting the corresponding removal events.
    pub async fn unwatch(&self, paths: Vec<String>) -> Result<()> {
        let (reply, recv) = oneshot::channel();
        self.cmd_tx
            .send(Command::Unwatch { paths, reply })
            .await
            .map_err(|_| WatchError::Closed)?;
        recv.await.map_err(|_| WatchError::Closed)?
    }

    /// The `getWatched()` equivalent: every tracked directory, sorted, paired
    /// with its sorted child basenames.
    pub async fn get_watched(&self) -> Result<Vec<(PathBuf, Vec<String>)>> {
        let (reply, recv) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetWatched { reply })
            .await
            .map_err(|_| WatchError::Closed)?;
        recv.await.map_err(|_| WatchError::Closed)
    }

    /// Stop all backend watches and release every resource. Subsequent calls
    /// to `add`/`unwatch` return [`WatchError::Closed`].
    pub async fn close(&self) -> Result<()> {
        let (reply, recv) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close { reply })
            .await
            .map_err(|_| WatchError::Closed)?;
        recv.await.map_err(|_| WatchError::Closed)
    }

    pub fn subscribe_add(&self) -> tokio::sync::broadcast::Receiver<FsEvent> {
        self.subscribers.subscribe_add()
    }

    pub fn subscribe_add_dir(&self) -> tokio::sync::broadcast::Receiver<FsEvent> {
        self.subscribers.subscribe_add_dir()
    }

    pub fn subscribe_change(&self) -> tokio::sync::broadcast::Receiver<FsEvent> {
        self.subscribers.subscribe_change()
    }

    pub fn subscribe_unlink(&self) -> tokio::sync::broadcast::Receiver<FsEvent> {
        self.subscribers.subscribe_unlink()
    }

    pub fn subscribe_unlink_dir(&self) -> tokio::sync::broadcast::Receiver<FsEvent> {
        self.subscribers.subscribe_unlink_dir()
    }

    pub fn subscribe_ready(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.subscribers.subscribe_ready()
    }

    pub fn subscribe_error(&self) -> tokio::sync::broadcast::Receiver<std::sync::Arc<WatchError>> {
        self.subscribers.subscribe_error()
    }

    /// Every event on one channel, in emission order, excluding `error`.
    pub fn subscribe_all(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.subscribers.subscribe_all()
    }
}
