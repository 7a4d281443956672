//! Normalized event model (part of C7): the public vocabulary the engine
//! emits once a raw backend event has passed through the ignore filter,
//! throttle, atomic-save reconciler, and write-stabilization monitor.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::WatchError;

#[derive(Debug, Clone)]
pub struct FsEvent {
    pub path: PathBuf,
    pub stat: Option<Arc<std::fs::Metadata>>,
}

impl FsEvent {
    pub fn new(path: PathBuf, stat: Option<std::fs::Metadata>) -> Self {
        Self { path, stat: stat.map(Arc::new) }
    }
}

/// One emitted occurrence. `Error` is deliberately excluded from
/// [`Notification`]'s broadcast on the `all` channel — it has its own
/// dedicated channel and is never fanned out alongside ordinary events.
#[derive(Debug, Clone)]
pub enum Notification {
    Add(FsEvent),
    AddDir(FsEvent),
    Change(FsEvent),
    Unlink(FsEvent),
    UnlinkDir(FsEvent),
    Ready,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Add(e) => write!(f, "add {}", e.path.display()),
            Notification::AddDir(e) => write!(f, "addDir {}", e.path.display()),
            Notification::Change(e) => write!(f, "change {}", e.path.display()),
            Notification::Unlink(e) => write!(f, "unlink {}", e.path.display()),
            Notification::UnlinkDir(e) => write!(f, "unlinkDir {}", e.path.display()),
            Notification::Ready => write!(f, "ready"),
        }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Per-kind broadcast channels plus the `all` fan-out and the dedicated
/// `error` channel. Cloning a `Subscribers` shares the same underlying
/// senders; every clone (the public handle, the engine actor) reaches the
/// same set of listeners.
#[derive(Clone)]
pub struct Subscribers {
    add: broadcast::Sender<FsEvent>,
    add_dir: broadcast::Sender<FsEvent>,
    change: broadcast::Sender<FsEvent>,
    unlink: broadcast::Sender<FsEvent>,
    unlink_dir: broadcast::Sender<FsEvent>,
    ready: broadcast::Sender<()>,
    error: broadcast::Sender<Arc<WatchError>>,
    all: broadcast::Sender<Notification>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self {
            add: broadcast::channel(CHANNEL_CAPACITY).0,
            add_dir: broadcast::channel(CHANNEL_CAPACITY).0,
            change: broadcast::channel(CHANNEL_CAPACITY).0,
            unlink: broadcast::channel(CHANNEL_CAPACITY).0,
            unlink_dir: broadcast::channel(CHANNEL_CAPACITY).0,
            ready: broadcast::channel(16).0,
            error: broadcast::channel(CHANNEL_CAPACITY).0,
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_add(&self) -> broadcast::Receiver<FsEvent> {
        self.add.subscribe()
    }
    pub fn subscribe_add_dir(&self) -> broadcast::Receiver<FsEvent> {
        self.add_dir.subscribe()
    }
    pub fn subscribe_change(&self) -> broadcast::Receiver<FsEvent> {
        self.change.subscribe()
    }
    pub fn subscribe_unlink(&self) -> broadcast::Receiver<FsEvent> {
        self.unlink.subscribe()
    }
    pub fn subscribe_unlink_dir(&self) -> broadcast::Receiver<FsEvent> {
        self.unlink_dir.subscribe()
    }
    pub fn subscribe_ready(&self) -> broadcast::Receiver<()> {
        self.ready.subscribe()
    }
    pub fn subscribe_error(&self) -> broadcast::Receiver<Arc<WatchError>> {
        self.error.subscribe()
    }
    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Dispatch a normalized event to its per-kind channel and the `all`
    /// fan-out. A lagging or subscriber-less channel is not an error: a
    /// `broadcast::Sender::send` failure just means nobody is listening.
    pub fn emit(&self, notification: Notification) {
        match &notification {
            Notification::Add(e) => {
                let _ = self.add.send(e.clone());
            }
            Notification::AddDir(e) => {
                let _ = self.add_dir.send(e.clone());
            }
            Notification::Change(e) => {
                let _ = self.change.send(e.clone());
            }
            Notification::Unlink(e) => {
                let _ = self.unlink.send(e.clone());
            }
            Notification::UnlinkDir(e) => {
                let _ = self.unlink_dir.send(e.clone());
            }
            Notification::Ready => {
                let _ = self.ready.send(());
            }
        }
        let _ = self.all.send(notification);
    }

    pub fn emit_error(&self, error: Arc<WatchError>) {
        let _ = self.error.send(error);
    }
}

impl Default for Subscribers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_reaches_both_dedicated_and_all_channels() {
        let subs = Subscribers::new();
        let mut ready_rx = subs.subscribe_ready();
        let mut all_rx = subs.subscribe_all();
        subs.emit(Notification::Ready);
        ready_rx.try_recv().unwrap();
        let notification = all_rx.try_recv().unwrap();
        assert!(matches!(notification, Notification::Ready));
    }

    #[test]
    fn add_reaches_add_channel_not_unlink_channel() {
        let subs = Subscribers::new();
        let mut add_rx = subs.subscribe_add();
        let mut unlink_rx = subs.subscribe_unlink();
        subs.emit(Notification::Add(FsEvent::new(PathBuf::from("/w/a"), None)));
        assert!(add_rx.try_recv().is_ok());
        assert!(unlink_rx.try_recv().is_err());
    }

    #[test]
    fn error_channel_is_independent_of_all() {
        let subs = Subscribers::new();
        let mut all_rx = subs.subscribe_all();
        subs.emit_error(Arc::new(WatchError::Closed));
        assert!(all_rx.try_recv().is_err());
    }
}
