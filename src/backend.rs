//! Backend interface (C9): the contract a concrete OS watching bridge must
//! present to the core. The three backend flavors (recursive FS-events,
//! per-directory, polling) are out of scope as *separate* crates;
//! [`NotifyBackend`] here is the one concrete
//! implementation this crate ships, built on the `notify` crate the way the
//! teacher's `devenv-event-sources::fs` module builds on `watchexec`'s fs
//! worker (itself a thin wrapper over `notify`) — it satisfies the interface
//! in all three modes rather than being split into three bridge crates.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config as NotifyConfig, Event as NotifyEvent, EventKind as NotifyEventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Create,
    Modify,
    Remove,
}

#[derive(Debug)]
pub enum BackendError {
    NotFound,
    NotADirectory,
    PermissionDenied,
    Other(notify::Error),
}

impl BackendError {
    fn classify(err: &notify::Error) -> Self {
        use notify::ErrorKind;
        match &err.kind {
            ErrorKind::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => BackendError::NotFound,
                std::io::ErrorKind::PermissionDenied => BackendError::PermissionDenied,
                std::io::ErrorKind::NotADirectory => BackendError::NotADirectory,
                _ => BackendError::Other(notify::Error::new(ErrorKind::Generic(io_err.to_string()))),
            },
            _ => BackendError::Other(notify::Error::new(ErrorKind::Generic(err.to_string()))),
        }
    }
}

#[derive(Debug)]
pub enum BackendMessage {
    Event { watch_id: WatchId, kind: RawKind, path: PathBuf },
    InitialScanDone { watch_id: WatchId },
    Error { watch_id: WatchId, error: BackendError },
}

/// Cancellation handle for a single backend watch. Invocation is idempotent:
/// a second call is a no-op. Owned exclusively by whichever map entry holds
/// it (the engine's watch table).
pub struct Closer(Option<Box<dyn FnOnce() + Send>>);

impl Closer {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Closer(Some(Box::new(f)))
    }

    pub fn close(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Recursive,
    PerDirectory,
    Polling,
}

#[derive(Debug, Clone, Copy)]
pub struct BackendOptions {
    pub kind: BackendKind,
    pub poll_interval: Duration,
}

#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Begin watching `root`. Raw events and the initial-scan-complete
    /// signal are posted to `tx`, tagged with `watch_id` so the core can
    /// attribute them back to the `add()` call that created this watch.
    async fn watch(
        &self,
        root: &Path,
        opts: BackendOptions,
        tx: mpsc::Sender<BackendMessage>,
        watch_id: WatchId,
    ) -> Result<Closer, WatchError>;
}

/// The one concrete backend this crate ships, built on `notify`.
pub struct NotifyBackend;

impl NotifyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotifyBackend {
    fn default() -> Self {
        Self::new()
    }
}

enum AnyWatcher {
    Recommended(RecommendedWatcher),
    Poll(PollWatcher),
}

impl AnyWatcher {
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            AnyWatcher::Recommended(w) => w.watch(path, mode),
            AnyWatcher::Poll(w) => w.watch(path, mode),
        }
    }
}

#[async_trait::async_trait]
impl Backend for NotifyBackend {
    async fn watch(
        &self,
        root: &Path,
        opts: BackendOptions,
        tx: mpsc::Sender<BackendMessage>,
        watch_id: WatchId,
    ) -> Result<Closer, WatchError> {
        let root = root.to_path_buf();
        let recursive_mode = match opts.kind {
            BackendKind::PerDirectory => RecursiveMode::NonRecursive,
            _ => RecursiveMode::Recursive,
        };

        let forward_tx = tx.clone();
        let per_directory = opts.kind == BackendKind::PerDirectory;
        let watcher_slot: Arc<Mutex<Option<AnyWatcher>>> = Arc::new(Mutex::new(None));
        let callback_slot = watcher_slot.clone();

        let callback = move |res: notify::Result<NotifyEvent>| {
            handle_notify_result(res, &forward_tx, watch_id, per_directory, &callback_slot);
        };

        let watcher = match opts.kind {
            BackendKind::Polling => {
                let config = NotifyConfig::default().with_poll_interval(opts.poll_interval);
                AnyWatcher::Poll(
                    PollWatcher::new(callback, config)
                        .map_err(|e| WatchError::Backend { path: root.clone(), source: e })?,
                )
            }
            BackendKind::Recursive | BackendKind::PerDirectory => AnyWatcher::Recommended(
                RecommendedWatcher::new(callback, NotifyConfig::default())
                    .map_err(|e| WatchError::Backend { path: root.clone(), source: e })?,
            ),
        };

        *watcher_slot.lock().unwrap() = Some(watcher);
        watcher_slot
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .watch(&root, recursive_mode)
            .map_err(|e| WatchError::Backend { path: root.clone(), source: e })?;

        let scan_tx = tx.clone();
        let scan_root = root.clone();
        let recurse = !per_directory;
        tokio::task::spawn_blocking(move || {
            scan_initial(&scan_root, recurse, &scan_tx, watch_id);
            let _ = scan_tx.blocking_send(BackendMessage::InitialScanDone { watch_id });
        });

        Ok(Closer::new(move || {
            drop(watcher_slot);
        }))
    }
}

fn handle_notify_result(
    res: notify::Result<NotifyEvent>,
    tx: &mpsc::Sender<BackendMessage>,
    watch_id: WatchId,
    per_directory: bool,
    watcher_slot: &Arc<Mutex<Option<AnyWatcher>>>,
) {
    match res {
        Ok(event) => {
            let kind = match event.kind {
                NotifyEventKind::Create(_) => RawKind::Create,
                NotifyEventKind::Remove(_) => RawKind::Remove,
                NotifyEventKind::Modify(_) | NotifyEventKind::Access(_) | NotifyEventKind::Other => {
                    RawKind::Modify
                }
                NotifyEventKind::Any => RawKind::Modify,
            };
            for path in event.paths {
                if per_directory && kind == RawKind::Create && path.is_dir() {
                    if let Ok(mut guard) = watcher_slot.lock() {
                        if let Some(w) = guard.as_mut() {
                            let _ = w.watch(&path, RecursiveMode::NonRecursive);
                        }
                    }
                }
                debug!(?path, ?kind, "raw backend event");
                let _ = tx.blocking_send(BackendMessage::Event { watch_id, kind, path });
            }
        }
        Err(err) => {
            let classified = BackendError::classify(&err);
            warn!(?classified, "backend error");
            let _ = tx.blocking_send(BackendMessage::Error { watch_id, error: classified });
        }
    }
}

/// Walk the tree under `root` (excluding `root` itself) posting a `Create`
/// for every entry found, so the engine's ordinary event pipeline handles
/// initial-scan discoveries the same way it handles live ones. `recurse`
/// controls whether descent continues past the first level, mirroring the
/// recursive-vs-per-directory backend distinction.
pub(crate) fn scan_initial(root: &Path, recurse: bool, tx: &mpsc::Sender<BackendMessage>, watch_id: WatchId) {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let _ = tx.blocking_send(BackendMessage::Event { watch_id, kind: RawKind::Create, path: path.clone() });
            if recurse && path.is_dir() {
                stack.push(path);
            }
        }
    }
}
