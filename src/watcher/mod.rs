//! Data directory watcher
//!
//! Uses the `notify` crate to watch one directory (non-recursively) and turns
//! raw filesystem notifications into typed [`DomainEvent`]s carrying freshly
//! parsed file content.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  raw   ┌──────────────┐ DomainEvent ┌──────────────────┐
//! │   notify    │───────>│  watch loop  │────────────>│ SubscriptionReg. │
//! │  (thread)   │ mpsc   │ (tokio task) │    mpsc     │   dispatch loop  │
//! └─────────────┘        └──────┬───────┘             └──────────────────┘
//!                               │ writes
//!                        ┌──────▼───────┐
//!                        │ known files  │<── current_listing() (readers)
//!                        │  (RwLock)    │
//!                        └──────────────┘
//! ```
//!
//! The known-file cache has a single writer (the watch loop) and any number
//! of readers. File content is never cached; it is read and parsed on every
//! notification and every query.

pub mod events;
pub mod parser;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::WatcherConfig;
use crate::error::{GraphexError, Result};

pub use events::{ChangeKind, DomainEvent, FileData};
pub use parser::parse_file;

type RawEvent = notify::Result<Event>;

/// Watches a directory of data files
pub struct FileWatcher {
    /// Watched directory as configured
    dir: PathBuf,
    config: WatcherConfig,
    /// Known file names, relative to `dir`
    files: Arc<RwLock<BTreeSet<String>>>,
    /// Producer side, moved into the watch loop on start
    events_tx: Mutex<Option<mpsc::Sender<DomainEvent>>>,
    /// Consumer side, handed out once by `domain_events`
    events_rx: Mutex<Option<mpsc::Receiver<DomainEvent>>>,
    running: Arc<AtomicBool>,
}

impl FileWatcher {
    /// Create a watcher for `dir`. Nothing is read until [`FileWatcher::start`].
    pub fn new(dir: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            dir: dir.into(),
            config,
            files: Arc::new(RwLock::new(BTreeSet::new())),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check if the watch loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Scan the directory, then start consuming filesystem notifications.
    ///
    /// Must be called from within a tokio runtime. Fails if the directory
    /// cannot be read or watched. The loop stops when `shutdown` is cancelled
    /// or the returned handle is stopped/dropped.
    pub fn start(&self, shutdown: &CancellationToken) -> Result<WatcherHandle> {
        let root = self
            .dir
            .canonicalize()
            .map_err(|source| GraphexError::DirectoryScan {
                path: self.dir.clone(),
                source,
            })?;

        let initial = scan_directory(&root, &self.config.suffix).map_err(|source| {
            GraphexError::DirectoryScan {
                path: self.dir.clone(),
                source,
            }
        })?;
        tracing::info!(
            dir = %root.display(),
            files = initial.len(),
            "Initial scan complete"
        );
        *self.files.write() = initial;

        let Some(events_tx) = self.events_tx.lock().take() else {
            return Err(GraphexError::Watch {
                message: format!("watcher for {} already started", self.dir.display()),
            });
        };

        let (raw_tx, raw_rx) = mpsc::channel(self.config.event_capacity.max(1));
        let watcher = arm_watch(&root, raw_tx.clone())?;

        let token = shutdown.child_token();
        self.running.store(true, Ordering::SeqCst);
        let watch_loop = WatchLoop {
            root,
            config: self.config.clone(),
            files: Arc::clone(&self.files),
            events_tx,
            raw_tx,
            raw_rx,
            watcher: Some(watcher),
            shutdown: token.clone(),
        };
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            watch_loop.run().await;
            running.store(false, Ordering::SeqCst);
        });

        Ok(WatcherHandle { token })
    }

    /// Snapshot of the known file names, sorted
    pub fn current_listing(&self) -> Vec<String> {
        self.files.read().iter().cloned().collect()
    }

    /// Read and parse one file on demand.
    ///
    /// `name` must be a plain file name inside the watched directory.
    pub async fn current_file_content(&self, name: &str) -> Result<FileData> {
        if !is_plain_file_name(name) {
            return Err(GraphexError::InvalidFileName {
                name: name.to_string(),
            });
        }

        let bytes = tokio::fs::read(self.dir.join(name))
            .await
            .map_err(|source| GraphexError::FileRead {
                name: name.to_string(),
                source,
            })?;
        Ok(parse_file(&bytes))
    }

    /// Take the domain event stream.
    ///
    /// There is a single consumer: the first call returns the receiver, later
    /// calls return `None`. The stream ends once the watch loop stops.
    pub fn domain_events(&self) -> Option<mpsc::Receiver<DomainEvent>> {
        self.events_rx.lock().take()
    }
}

/// Read side of the watched directory, as seen by subscribers
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Sorted names of the currently known files
    fn current_listing(&self) -> Vec<String>;

    /// Parsed content of one file
    async fn current_file_content(&self, name: &str) -> Result<FileData>;
}

#[async_trait]
impl FileStore for FileWatcher {
    fn current_listing(&self) -> Vec<String> {
        FileWatcher::current_listing(self)
    }

    async fn current_file_content(&self, name: &str) -> Result<FileData> {
        FileWatcher::current_file_content(self, name).await
    }
}

/// Handle for controlling a running watcher
pub struct WatcherHandle {
    token: CancellationToken,
}

impl WatcherHandle {
    /// Stop the watcher
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Single writer of the known-file cache
struct WatchLoop {
    root: PathBuf,
    config: WatcherConfig,
    files: Arc<RwLock<BTreeSet<String>>>,
    events_tx: mpsc::Sender<DomainEvent>,
    raw_tx: mpsc::Sender<RawEvent>,
    raw_rx: mpsc::Receiver<RawEvent>,
    /// Kept alive for as long as notifications are wanted
    watcher: Option<RecommendedWatcher>,
    shutdown: CancellationToken,
}

impl WatchLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Watch loop shutting down");
                    break;
                }
                raw = self.raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.handle(event).await,
                    Some(Err(e)) => {
                        tracing::warn!("Watcher returned error: {}", e);
                        if !self.rearm().await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.watcher = None;
        tracing::info!(dir = %self.root.display(), "Watch loop stopped");
    }

    async fn handle(&mut self, event: Event) {
        for (change, path) in classify(&event) {
            let Some(name) = tracked_name(&self.root, &path, &self.config.suffix) else {
                tracing::trace!("Ignoring {:?}", path);
                continue;
            };

            match change {
                RawChange::Appeared => {
                    if path.is_dir() {
                        continue;
                    }
                    let inserted = self.files.write().insert(name.clone());
                    if inserted {
                        tracing::debug!("File {:?} created", name);
                        let data = read_data(&path).await.unwrap_or_default();
                        self.emit(DomainEvent::Created { name, data }).await;
                    } else if let Some(data) = read_data(&path).await {
                        // Replaced in place, e.g. renamed over an existing file
                        tracing::debug!("File {:?} replaced", name);
                        self.emit(DomainEvent::Modified { name, data }).await;
                    }
                }
                RawChange::Written => {
                    tracing::debug!("File {:?} modified", name);
                    match read_data(&path).await {
                        Some(data) => self.emit(DomainEvent::Modified { name, data }).await,
                        None => tracing::debug!("File {:?} vanished before it was read", name),
                    }
                }
                RawChange::Vanished => {
                    let removed = self.files.write().remove(&name);
                    if removed {
                        tracing::debug!("File {:?} removed", name);
                        self.emit(DomainEvent::Removed { name }).await;
                    }
                }
            }
        }
    }

    async fn emit(&self, event: DomainEvent) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            result = self.events_tx.send(event) => {
                if result.is_err() {
                    tracing::debug!("Domain event stream has no consumer");
                }
            }
        }
    }

    /// Re-establish the watch after a notify error. Returns false once all
    /// attempts failed or shutdown was requested.
    async fn rearm(&mut self) -> bool {
        self.watcher = None;

        for attempt in 1..=self.config.rearm_attempts {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.config.rearm_delay()) => {}
            }

            match arm_watch(&self.root, self.raw_tx.clone()) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    tracing::info!(attempt, "Re-established watch on {}", self.root.display());
                    self.resync().await;
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max = self.config.rearm_attempts,
                        "Re-arming watch failed: {}",
                        e
                    );
                }
            }
        }

        tracing::error!(
            "Giving up on watching {} after {} attempts",
            self.root.display(),
            self.config.rearm_attempts
        );
        false
    }

    /// Rescan after a gap in notifications and report what changed meanwhile
    async fn resync(&mut self) {
        let current = match scan_directory(&self.root, &self.config.suffix) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("Rescan of {} failed: {}", self.root.display(), e);
                return;
            }
        };

        let (appeared, vanished) = {
            let known = self.files.read();
            let appeared: Vec<String> = current.difference(&known).cloned().collect();
            let vanished: Vec<String> = known.difference(&current).cloned().collect();
            (appeared, vanished)
        };
        *self.files.write() = current;

        for name in vanished {
            self.emit(DomainEvent::Removed { name }).await;
        }
        for name in appeared {
            let data = read_data(&self.root.join(&name)).await.unwrap_or_default();
            self.emit(DomainEvent::Created { name, data }).await;
        }
    }
}

/// What happened to one path, before name filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawChange {
    Appeared,
    Written,
    Vanished,
}

fn classify(event: &Event) -> Vec<(RawChange, PathBuf)> {
    let all = |change: RawChange| -> Vec<(RawChange, PathBuf)> {
        event.paths.iter().map(|p| (change, p.clone())).collect()
    };

    match &event.kind {
        EventKind::Create(_) => all(RawChange::Appeared),
        EventKind::Remove(_) => all(RawChange::Vanished),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(RawChange::Vanished),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(RawChange::Appeared),
        // Backends that report `Both` also report its `From` and `To` halves
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let change = if p.exists() {
                    RawChange::Appeared
                } else {
                    RawChange::Vanished
                };
                (change, p.clone())
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(RawChange::Written),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Name of `path` relative to `root`, if it is a direct child with the suffix
fn tracked_name(root: &Path, path: &Path, suffix: &str) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let name = relative.to_str()?;
    (is_plain_file_name(name) && name.ends_with(suffix)).then(|| name.to_string())
}

/// A single normal path component: no separators, no `.` or `..`
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(|c| c == '/' || c == '\\')
}

fn scan_directory(dir: &Path, suffix: &str) -> std::io::Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(suffix) {
                files.insert(name.to_string());
            }
        }
    }
    Ok(files)
}

fn arm_watch(root: &Path, raw_tx: mpsc::Sender<RawEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: RawEvent| {
        // Runs on the notify thread; the receiver is gone once the loop stops
        let _ = raw_tx.blocking_send(res);
    })?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

async fn read_data(path: &Path) -> Option<FileData> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(parse_file(&bytes)),
        Err(e) => {
            tracing::debug!("Reading {:?} failed: {}", path, e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
