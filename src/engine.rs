//! The watcher actor: owns every piece of mutable state (C7 emit/dispatch,
//! C8 add/unwatch orchestration, C10 recursive removal) and is the only task
//! that ever touches it. Every other task — backend bridges, expiry timers —
//! only ever sends a message in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::{Glob, GlobMatcher};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::atomic::AtomicReconciler;
use crate::backend::{
    self, Backend, BackendError, BackendKind, BackendMessage, BackendOptions, Closer, NotifyBackend,
    RawKind, WatchId,
};
use crate::error::{Result, WatchError};
use crate::event::{FsEvent, Notification, Subscribers};
use crate::ignore::IgnoreSet;
use crate::options::WatchOptions;
use crate::path_glob;
use crate::registry::WatchRegistry;
use crate::stabilize::{PendingWriteOrigin, WriteStabilizer};
use crate::throttle::{Action, ThrottleDecision, Throttler};

pub enum Command {
    Add { paths: Vec<String>, reply: oneshot::Sender<Result<()>> },
    Unwatch { paths: Vec<String>, reply: oneshot::Sender<Result<()>> },
    Close { reply: oneshot::Sender<()> },
    GetWatched { reply: oneshot::Sender<Vec<(PathBuf, Vec<String>)>> },
}

enum Msg {
    Command(Command),
    Backend(BackendMessage),
    PollWrite { path: PathBuf, generation: u64 },
    ExpireUnlink { path: PathBuf, generation: u64 },
}

struct WatchEntry {
    root: PathBuf,
    matcher: Option<GlobMatcher>,
    closer: Closer,
    scan_done: bool,
}

pub struct Engine {
    options: WatchOptions,
    backend: Arc<dyn Backend>,
    registry: WatchRegistry,
    ignore: IgnoreSet,
    throttler: Throttler,
    stabilizer: WriteStabilizer,
    atomic: AtomicReconciler,
    subscribers: Subscribers,
    watches: HashMap<WatchId, WatchEntry>,
    next_watch_id: u64,
    msg_tx: mpsc::Sender<Msg>,
    ready_sent: bool,
    closed: bool,
}

/// Spawn the engine actor and return a command channel plus the shared
/// subscriber hub (both are what [`crate::Watcher`] wraps).
pub fn spawn(options: WatchOptions) -> (mpsc::Sender<Command>, Subscribers) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (msg_tx, mut msg_rx) = mpsc::channel::<Msg>(1024);
    let subscribers = Subscribers::new();

    let atomic_save_detection = !matches!(options.atomic, crate::options::AtomicOption::Disabled);
    let ignore = IgnoreSet::new(
        options.ignored.iter().cloned().map(crate::ignore::IgnorePattern::Glob).collect(),
        atomic_save_detection,
    );

    let mut engine = Engine {
        options,
        backend: Arc::new(NotifyBackend::new()),
        registry: WatchRegistry::new(),
        ignore,
        throttler: Throttler::new(),
        stabilizer: WriteStabilizer::new(),
        atomic: AtomicReconciler::new(),
        subscribers: subscribers.clone(),
        watches: HashMap::new(),
        next_watch_id: 0,
        msg_tx: msg_tx.clone(),
        ready_sent: false,
        closed: false,
    };

    let forward_tx = msg_tx.clone();
    tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if forward_tx.send(Msg::Command(cmd)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            engine.handle(msg).await;
            if engine.closed {
                break;
            }
        }
    });

    (cmd_tx, subscribers)
}

fn choose_backend(options: &WatchOptions) -> BackendKind {
    if options.use_polling {
        BackendKind::Polling
    } else if options.use_fs_events == Some(false) {
        BackendKind::PerDirectory
    } else {
        BackendKind::Recursive
    }
}

impl Engine {
    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Command(Command::Add { paths, reply }) => {
                let result = self.add(paths).await;
                let _ = reply.send(result);
            }
            Msg::Command(Command::Unwatch { paths, reply }) => {
                let result = self.unwatch(paths).await;
                let _ = reply.send(result);
            }
            Msg::Command(Command::Close { reply }) => {
                self.close();
                let _ = reply.send(());
            }
            Msg::Command(Command::GetWatched { reply }) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Msg::Backend(event) => self.handle_backend_message(event).await,
            Msg::PollWrite { path, generation } => self.poll_write(path, generation).await,
            Msg::ExpireUnlink { path, generation } => self.expire_unlink(path, generation),
        }
    }

    async fn add(&mut self, paths: Vec<String>) -> Result<()> {
        if self.closed {
            return Err(WatchError::Closed);
        }
        for raw in paths {
            if raw.is_empty() {
                return Err(WatchError::InvalidPath(raw));
            }
            let resolved = path_glob::resolve(&raw, self.options.cwd.as_deref());
            if let Some(negated) = resolved.strip_prefix('!') {
                self.ignore.learn(negated);
                continue;
            }
            self.ignore.unlearn(&resolved);

            let entries: Vec<String> = if self.options.disable_globbing {
                vec![resolved]
            } else {
                path_glob::brace_expand(&resolved)
            };

            for entry in entries {
                self.add_one(&entry).await?;
            }
        }
        Ok(())
    }

    async fn add_one(&mut self, entry: &str) -> Result<()> {
        let is_glob = !self.options.disable_globbing
            && path_glob::classify(entry) == path_glob::PathKind::Glob;
        let root = path_glob::watch_root(entry);
        let matcher = if is_glob {
            Glob::new(entry).ok().map(|g| g.compile_matcher())
        } else {
            None
        };

        let watch_id = WatchId(self.next_watch_id);
        self.next_watch_id += 1;

        let kind = choose_backend(&self.options);
        let backend_opts = BackendOptions { kind, poll_interval: self.options.interval };

        let (backend_tx, mut backend_rx) = mpsc::channel::<BackendMessage>(256);
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = backend_rx.recv().await {
                if msg_tx.send(Msg::Backend(event)).await.is_err() {
                    break;
                }
            }
        });

        let closer = self.backend.watch(&root, backend_opts, backend_tx, watch_id).await?;

        info!(path = %root.display(), name = %self.options.name, "watching");
        self.watches.insert(watch_id, WatchEntry { root, matcher, closer, scan_done: false });
        Ok(())
    }

    async fn unwatch(&mut self, paths: Vec<String>) -> Result<()> {
        if self.closed {
            return Err(WatchError::Closed);
        }
        for raw in paths {
            let resolved = path_glob::resolve(&raw, self.options.cwd.as_deref());
            let target = PathBuf::from(&resolved);
            self.ignore.learn(&resolved);

            let matching: Vec<WatchId> = self
                .watches
                .iter()
                .filter(|(_, entry)| entry.root == target || entry.root.starts_with(&target))
                .map(|(id, _)| *id)
                .collect();
            for id in matching {
                if let Some(mut entry) = self.watches.remove(&id) {
                    entry.closer.close();
                }
            }

            self.remove_subtree(&target);
        }
        Ok(())
    }

    /// Recursive removal engine (C10): unwatch and retire every tracked
    /// directory at or beneath `root`, emitting `unlink`/`unlinkDir` for
    /// everything that was known to exist, deepest directory first.
    fn remove_subtree(&mut self, root: &Path) {
        let dirs = self.registry.subtree_dirs_deepest_first(root);
        for dir in &dirs {
            let children = self.registry.children(dir);
            for child in children {
                let child_path = dir.join(&child);
                if !self.registry.contains_dir(&child_path) {
                    self.stabilizer.cancel(&child_path);
                    self.emit_file(Notification::Unlink(FsEvent::new(child_path, None)));
                }
            }
        }
        for dir in &dirs {
            self.stabilizer.cancel(dir);
            self.emit_file(Notification::UnlinkDir(FsEvent::new(dir.clone(), None)));
            self.registry.drop_dir(dir);
        }
        if let Some(parent) = root.parent() {
            if let Some(basename) = root.file_name().and_then(|n| n.to_str()) {
                self.registry.remove(parent, basename);
            }
        }
    }

    fn close(&mut self) {
        for (_, mut entry) in self.watches.drain() {
            entry.closer.close();
        }
        self.registry.clear();
        self.closed = true;
    }

    async fn handle_backend_message(&mut self, msg: BackendMessage) {
        match msg {
            BackendMessage::Event { watch_id, kind, path } => self.handle_raw_event(watch_id, kind, path).await,
            BackendMessage::InitialScanDone { watch_id } => self.handle_scan_done(watch_id),
            BackendMessage::Error { watch_id, error } => self.handle_backend_error(watch_id, error),
        }
    }

    fn passes_filters(&mut self, watch_id: WatchId, path: &Path, is_dir: bool) -> bool {
        let Some(entry) = self.watches.get(&watch_id) else { return false };
        if let Some(matcher) = &entry.matcher {
            if !is_dir && !matcher.is_match(path) {
                return false;
            }
        }
        if !self.options.extensions.is_empty() && !is_dir {
            let matches_ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| self.options.extensions.iter().any(|want| want == e))
                .unwrap_or(false);
            if !matches_ext {
                return false;
            }
        }
        !self.ignore.is_ignored(path, None)
    }

    fn scan_gate(&self, watch_id: WatchId) -> bool {
        !self.options.ignore_initial
            || self.watches.get(&watch_id).map(|e| e.scan_done).unwrap_or(true)
    }

    async fn handle_raw_event(&mut self, watch_id: WatchId, kind: RawKind, path: PathBuf) {
        let meta = tokio::fs::metadata(&path).await.ok();
        let is_dir = meta.as_ref().map(std::fs::Metadata::is_dir).unwrap_or(false);

        if !self.passes_filters(watch_id, &path, is_dir) {
            return;
        }

        match kind {
            RawKind::Create => self.handle_create(watch_id, path, meta, is_dir).await,
            RawKind::Modify => self.handle_modify(watch_id, path, meta).await,
            RawKind::Remove => self.handle_remove(watch_id, path).await,
        }
    }

    async fn handle_create(
        &mut self,
        watch_id: WatchId,
        path: PathBuf,
        meta: Option<std::fs::Metadata>,
        is_dir: bool,
    ) {
        let Some(parent) = path.parent().map(Path::to_path_buf) else { return };
        let Some(basename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return;
        };
        self.registry.add(&parent, &basename);

        if is_dir {
            self.registry.get_or_create(&path);
            if self.scan_gate(watch_id) {
                self.emit_file(Notification::AddDir(FsEvent::new(path.clone(), meta)));
            }
            if self.watches.get(&watch_id).map(|e| e.scan_done).unwrap_or(false) {
                let tx_holder = self.msg_tx.clone();
                let (scan_tx, mut scan_rx) = mpsc::channel::<BackendMessage>(128);
                let recurse = choose_backend(&self.options) != BackendKind::PerDirectory;
                let scan_path = path.clone();
                tokio::task::spawn_blocking(move || {
                    backend::scan_initial(&scan_path, recurse, &scan_tx, watch_id);
                });
                tokio::spawn(async move {
                    while let Some(event) = scan_rx.recv().await {
                        if tx_holder.send(Msg::Backend(event)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            return;
        }

        if self.atomic.try_reconcile_add(&path) {
            debug!(path = %path.display(), "reconciled unlink+add into change");
            self.emit_throttled_or_stable(Action::Change, PendingWriteOrigin::Change, watch_id, path, meta);
            return;
        }

        self.emit_throttled_or_stable(Action::Change, PendingWriteOrigin::Add, watch_id, path, meta);
    }

    async fn handle_modify(&mut self, watch_id: WatchId, path: PathBuf, meta: Option<std::fs::Metadata>) {
        if meta.as_ref().map(std::fs::Metadata::is_dir).unwrap_or(false) {
            return;
        }
        self.emit_throttled_or_stable(Action::Change, PendingWriteOrigin::Change, watch_id, path, meta);
    }

    /// Common tail for file add/change: either defer to the write-stabilization
    /// monitor or throttle-and-emit immediately, per `await_write_finish`.
    fn emit_throttled_or_stable(
        &mut self,
        action: Action,
        origin: PendingWriteOrigin,
        watch_id: WatchId,
        path: PathBuf,
        meta: Option<std::fs::Metadata>,
    ) {
        if let Some(await_write_finish) = self.options.await_write_finish {
            let now = Instant::now();
            if let Some(generation) = self.stabilizer.touch(&path, now, origin) {
                self.schedule_poll_write(path, generation, await_write_finish.poll_interval);
            }
            return;
        }

        let decision = self.throttler.throttle(action, &path, self.options.interval, Instant::now());
        if decision == ThrottleDecision::First && self.scan_gate(watch_id) {
            let notification = match origin {
                PendingWriteOrigin::Add => Notification::Add(FsEvent::new(path, meta)),
                PendingWriteOrigin::Change => Notification::Change(FsEvent::new(path, meta)),
            };
            self.emit_file(notification);
        }
    }

    fn schedule_poll_write(&self, path: PathBuf, generation: u64, poll_interval: Duration) {
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(poll_interval).await;
            let _ = tx.send(Msg::PollWrite { path, generation }).await;
        });
    }

    async fn poll_write(&mut self, path: PathBuf, generation: u64) {
        let Some(record) = self.stabilizer.current(&path, generation) else { return };
        let await_write_finish = match self.options.await_write_finish {
            Some(v) => v,
            None => return,
        };
        let origin = record.origin;

        let meta = tokio::fs::metadata(&path).await.ok();
        let Some(meta) = meta else {
            self.stabilizer.settle(&path);
            return;
        };
        let now = Instant::now();
        self.stabilizer.record_size(&path, generation, meta.len(), now);

        let Some(record) = self.stabilizer.current(&path, generation) else { return };
        if now.duration_since(record.last_change) >= await_write_finish.stability_threshold {
            self.stabilizer.settle(&path);
            let notification = match origin {
                PendingWriteOrigin::Add => Notification::Add(FsEvent::new(path, Some(meta))),
                PendingWriteOrigin::Change => Notification::Change(FsEvent::new(path, Some(meta))),
            };
            self.emit_file(notification);
        } else {
            self.schedule_poll_write(path, generation, await_write_finish.poll_interval);
        }
    }

    async fn handle_remove(&mut self, watch_id: WatchId, path: PathBuf) {
        self.stabilizer.cancel(&path);

        if self.registry.contains_dir(&path) {
            self.remove_subtree(&path);
            return;
        }

        let Some(parent) = path.parent().map(Path::to_path_buf) else { return };
        let Some(basename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return;
        };

        let recursive_backend = choose_backend(&self.options) == BackendKind::Recursive;
        let window = self.options.atomic.window(recursive_backend, self.options.use_polling);

        if let Some(window) = window {
            let generation = self.atomic.record_unlink(&path);
            let tx = self.msg_tx.clone();
            let path_clone = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let _ = tx.send(Msg::ExpireUnlink { path: path_clone, generation }).await;
            });
            return;
        }

        let decision = self.throttler.throttle(Action::Remove, &path, self.options.interval, Instant::now());
        self.registry.remove(&parent, &basename);
        if decision == ThrottleDecision::First && self.scan_gate(watch_id) {
            self.emit_file(Notification::Unlink(FsEvent::new(path, None)));
        }
    }

    fn expire_unlink(&mut self, path: PathBuf, generation: u64) {
        if !self.atomic.expire(&path, generation) {
            return;
        }
        let Some(parent) = path.parent().map(Path::to_path_buf) else { return };
        let Some(basename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return;
        };
        let decision = self.throttler.throttle(Action::Remove, &path, self.options.interval, Instant::now());
        self.registry.remove(&parent, &basename);
        if decision == ThrottleDecision::First {
            self.emit_file(Notification::Unlink(FsEvent::new(path, None)));
        }
    }

    fn handle_scan_done(&mut self, watch_id: WatchId) {
        if let Some(entry) = self.watches.get_mut(&watch_id) {
            entry.scan_done = true;
        }
        if !self.ready_sent && self.watches.values().all(|e| e.scan_done) {
            self.ready_sent = true;
            self.subscribers.emit(Notification::Ready);
        }
    }

    fn handle_backend_error(&mut self, watch_id: WatchId, error: BackendError) {
        if self.options.ignore_permission_errors && matches!(error, BackendError::PermissionDenied) {
            debug!(?watch_id, "ignoring permission error per configuration");
            return;
        }
        warn!(?watch_id, ?error, "backend error");
        let root = self.watches.get(&watch_id).map(|e| e.root.clone()).unwrap_or_default();
        let err = match error {
            BackendError::Other(source) => WatchError::Backend { path: root, source },
            _ => WatchError::Backend {
                path: root,
                source: notify::Error::new(notify::ErrorKind::Generic(format!("{error:?}"))),
            },
        };
        self.subscribers.emit_error(Arc::new(err));
    }

    fn emit_file(&self, notification: Notification) {
        self.subscribers.emit(notification);
    }
}
