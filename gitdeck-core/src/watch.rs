//! Debounced change notifications per repository
//!
//! One recursive filesystem watcher runs per watched path, shared by all of
//! that path's subscriptions. It also covers the repository's git directory
//! when that lives elsewhere, as it does for submodules. Raw events (and
//! synthetic ones injected after mutating operations) go through a single
//! debouncer that emits at most one [`ChangeEvent`] per window. Delivery is latest-value only: a subscriber
//! that was not listening misses what was sent and never sees anything sent
//! before it subscribed.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::path::RepositoryPath;
use crate::Result;

/// What produced a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSource {
    /// Files in the working tree
    WorkingTree,
    /// The metadata directory (refs, index, HEAD, ...)
    Metadata,
    /// A mutating operation run through this process
    Operation,
}

/// One debounced change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Repository that changed
    pub path: RepositoryPath,
    /// Increases by one per notification for this watcher
    pub sequence: u64,
    /// Distinct sources coalesced into this notification
    pub sources: Vec<ChangeSource>,
}

struct Watched {
    generation: u64,
    subscribers: usize,
    tx: watch::Sender<Option<ChangeEvent>>,
    raw: mpsc::UnboundedSender<ChangeSource>,
    _watcher: RecommendedWatcher,
    debouncer: JoinHandle<()>,
}

struct HubInner {
    paths: Mutex<HashMap<RepositoryPath, Watched>>,
    debounce: Duration,
    next_generation: AtomicU64,
}

impl HubInner {
    fn paths(&self) -> MutexGuard<'_, HashMap<RepositoryPath, Watched>> {
        self.paths.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, path: &RepositoryPath, generation: u64) {
        let mut paths = self.paths();
        let Some(watched) = paths.get_mut(path) else {
            return;
        };
        if watched.generation != generation {
            return;
        }
        watched.subscribers = watched.subscribers.saturating_sub(1);
        if watched.subscribers == 0 {
            if let Some(watched) = paths.remove(path) {
                watched.debouncer.abort();
                debug!(path = %path, "stopped watching");
            }
        }
    }
}

/// Owner of every active watcher
#[derive(Clone)]
pub struct WatchHub {
    inner: Arc<HubInner>,
}

impl fmt::Debug for WatchHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHub")
            .field("debounce", &self.inner.debounce)
            .finish_non_exhaustive()
    }
}

impl WatchHub {
    /// Create a hub coalescing events within `debounce`
    pub fn new(debounce: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                paths: Mutex::new(HashMap::new()),
                debounce,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to changes under `path`, starting its watcher if needed
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, path: &RepositoryPath) -> Result<Subscription> {
        let mut paths = self.inner.paths();

        if let Some(watched) = paths.get_mut(path) {
            watched.subscribers += 1;
            return Ok(Subscription {
                path: path.clone(),
                generation: watched.generation,
                rx: watched.tx.subscribe(),
                hub: Arc::downgrade(&self.inner),
                released: false,
            });
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let root = path.as_path().to_path_buf();
        let dirs = git_dirs(&root);
        let sink = raw_tx.clone();
        let handler_root = root.clone();
        let handler_dirs = dirs.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for source in classify(&handler_root, &handler_dirs, &event) {
                    let _ = sink.send(source);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        for dir in dirs.iter().filter(|dir| !dir.starts_with(&root)) {
            debug!(path = %path, git_dir = %dir.display(), "watching external git directory");
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }

        let (tx, rx) = watch::channel(None);
        let debouncer = tokio::spawn(debounce(
            path.clone(),
            raw_rx,
            tx.clone(),
            self.inner.debounce,
        ));
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        paths.insert(
            path.clone(),
            Watched {
                generation,
                subscribers: 1,
                tx,
                raw: raw_tx,
                _watcher: watcher,
                debouncer,
            },
        );
        debug!(path = %path, "started watching");

        Ok(Subscription {
            path: path.clone(),
            generation,
            rx,
            hub: Arc::downgrade(&self.inner),
            released: false,
        })
    }

    /// End a subscription
    pub fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    /// Inject a synthetic change; a no-op when nobody watches `path`
    pub fn notify(&self, path: &RepositoryPath, source: ChangeSource) {
        if let Some(watched) = self.inner.paths().get(path) {
            let _ = watched.raw.send(source);
        }
    }

    /// Whether a watcher is running for `path`
    pub fn is_watching(&self, path: &RepositoryPath) -> bool {
        self.inner.paths().contains_key(path)
    }

    /// Number of live subscriptions for `path`
    pub fn subscriber_count(&self, path: &RepositoryPath) -> usize {
        self.inner
            .paths()
            .get(path)
            .map(|w| w.subscribers)
            .unwrap_or(0)
    }
}

/// A live subscription; dropping it unsubscribes
pub struct Subscription {
    path: RepositoryPath,
    generation: u64,
    rx: watch::Receiver<Option<ChangeEvent>>,
    hub: Weak<HubInner>,
    released: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Repository this subscription watches
    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    /// Wait for the next notification
    ///
    /// Returns `None` once the watcher is gone.
    pub async fn changed(&mut self) -> Option<ChangeEvent> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(event) = self.rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    /// End the subscription explicitly
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(hub) = self.hub.upgrade() {
            hub.release(&self.path, self.generation);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

async fn debounce(
    path: RepositoryPath,
    mut raw: mpsc::UnboundedReceiver<ChangeSource>,
    tx: watch::Sender<Option<ChangeEvent>>,
    window: Duration,
) {
    let mut sequence = 0;

    while let Some(first) = raw.recv().await {
        let mut sources = vec![first];
        let deadline = Instant::now() + window;
        while let Ok(Some(source)) = tokio::time::timeout_at(deadline, raw.recv()).await {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        sources.sort();

        sequence += 1;
        debug!(path = %path, sequence, ?sources, "repository changed");
        tx.send_replace(Some(ChangeEvent {
            path: path.clone(),
            sequence,
            sources,
        }));
    }
}

/// Git directories backing the repository at `root`
///
/// Submodules and linked worktrees keep theirs outside `root`, behind a
/// `.git` file; a linked worktree also shares refs through a common
/// directory. Outside a repository this is just `root/.git`.
fn git_dirs(root: &Path) -> Vec<PathBuf> {
    let repo = match git2::Repository::open(root) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(path = %root.display(), error = %e, "no git directory to resolve");
            return vec![root.join(".git")];
        }
    };
    let mut dirs = Vec::new();
    for dir in [repo.path(), repo.commondir()] {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

/// Sources for one raw event, dropping noise
fn classify(root: &Path, git_dirs: &[PathBuf], event: &Event) -> Vec<ChangeSource> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }

    let mut sources = Vec::new();
    for path in &event.paths {
        if path.extension().is_some_and(|ext| ext == "lock") {
            continue;
        }

        let inside_git_dir = git_dirs
            .iter()
            .find_map(|dir| path.strip_prefix(dir).ok())
            .or_else(|| {
                path.strip_prefix(root)
                    .ok()
                    .and_then(|relative| relative.strip_prefix(".git").ok())
            });
        let source = match inside_git_dir {
            Some(relative) if in_object_store(relative) => continue,
            Some(_) => ChangeSource::Metadata,
            None => ChangeSource::WorkingTree,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// Whether `relative`, a path inside a git directory, is object storage
///
/// This includes the object stores of submodule git directories nested
/// under `modules/`.
fn in_object_store(relative: &Path) -> bool {
    let mut components = relative.components().map(|c| c.as_os_str());
    match components.next() {
        Some(first) if first == "objects" => true,
        Some(first) if first == "modules" => components.any(|c| c == "objects"),
        _ => false,
    }
}
