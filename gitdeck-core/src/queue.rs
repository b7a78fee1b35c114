//! Per-repository task serialization
//!
//! Each [`RepositoryPath`] gets a lane: an unbounded channel drained by one
//! worker task, so tasks for a path run strictly in submission order and
//! never overlap, while lanes for different paths run concurrently (bounded
//! by an optional global semaphore). Lanes are created on first use and
//! retire themselves once drained.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

use crate::path::RepositoryPath;
use crate::{Error, Result};

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Whether a task only reads repository state or may modify it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Reads state only
    Read,
    /// May modify the repository, its refs or its working tree
    Mutating,
}

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct QueuedTask {
    id: u64,
    kind: TaskKind,
    state: Arc<AtomicU8>,
    job: Job,
}

struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<QueuedTask>,
    cancel_through: Arc<AtomicU64>,
}

struct Inner {
    lanes: Mutex<HashMap<RepositoryPath, Lane>>,
    permits: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
}

impl Inner {
    fn lanes(&self) -> std::sync::MutexGuard<'_, HashMap<RepositoryPath, Lane>> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    state: Arc<AtomicU8>,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Identifier assigned at submission (monotonic across the queue)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the task has started running
    pub fn is_started(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), RUNNING | FINISHED)
    }

    /// Cancel the task if it has not started yet
    ///
    /// Returns `false` when the task is already running or done; a running
    /// task can only be stopped by its subprocess timeout.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wait for the task's result
    pub async fn join(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) if self.state.load(Ordering::Acquire) == CANCELLED => Err(Error::Cancelled),
            Err(_) => Err(Error::Queue("task dropped without a result".to_string())),
        }
    }
}

/// Per-path FIFO, single-flight task queue
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("active_paths", &self.active_paths())
            .finish_non_exhaustive()
    }
}

impl TaskQueue {
    /// Create a queue; `max_concurrent == 0` means no global cap
    pub fn new(max_concurrent: usize) -> Self {
        let permits = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                permits,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Number of paths that currently have a live lane
    pub fn active_paths(&self) -> usize {
        self.inner.lanes().len()
    }

    /// Enqueue `task` for `path`
    ///
    /// Order is fixed when this call returns, so tasks submitted one after
    /// another (from any number of callers) run in that order.
    pub fn submit<T, F, Fut>(&self, path: &RepositoryPath, kind: TaskKind, task: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(QUEUED));
        let (tx, rx) = oneshot::channel();

        let repo = path.clone();
        let job: Job = Box::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move {
                // Run on its own task so a panic surfaces as a JoinError here
                // instead of taking the lane worker down with it.
                let result = match tokio::spawn(async move { task().await }).await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => {
                        warn!(repo = %repo, task = id, "task panicked");
                        Err(Error::Queue(format!("task {} panicked", id)))
                    }
                    Err(e) => Err(Error::Queue(format!("task {} aborted: {}", id, e))),
                };
                // Receiver may have been dropped by an uninterested caller
                let _ = tx.send(result);
            })
        });

        let queued = QueuedTask {
            id,
            kind,
            state: Arc::clone(&state),
            job,
        };
        self.enqueue(path, queued);

        TaskHandle { id, state, rx }
    }

    /// Enqueue `task` and wait for its result
    pub async fn run<T, F, Fut>(&self, path: &RepositoryPath, kind: TaskKind, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.submit(path, kind, task).join().await
    }

    /// Cancel every task queued for `path` so far that has not started
    ///
    /// Tasks submitted afterwards run normally. Returns whether the path had
    /// a live lane.
    pub fn cancel_queued(&self, path: &RepositoryPath) -> bool {
        let lanes = self.inner.lanes();
        match lanes.get(path) {
            Some(lane) => {
                let last = self.inner.next_id.load(Ordering::Relaxed).saturating_sub(1);
                lane.cancel_through.fetch_max(last, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    fn enqueue(&self, path: &RepositoryPath, task: QueuedTask) {
        let mut lanes = self.inner.lanes();
        let task = match lanes.get(path) {
            Some(lane) => match lane.tx.send(task) {
                Ok(()) => return,
                Err(mpsc::error::SendError(task)) => task,
            },
            None => task,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let lane_id = task.id;
        let cancel_through = Arc::new(AtomicU64::new(0));
        // A fresh receiver cannot be closed yet
        let _ = tx.send(task);
        lanes.insert(
            path.clone(),
            Lane {
                id: lane_id,
                tx,
                cancel_through: Arc::clone(&cancel_through),
            },
        );
        debug!(repo = %path, "opened task lane");

        tokio::spawn(drive_lane(
            Arc::clone(&self.inner),
            path.clone(),
            lane_id,
            rx,
            cancel_through,
        ));
    }
}

async fn drive_lane(
    inner: Arc<Inner>,
    path: RepositoryPath,
    lane_id: u64,
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    cancel_through: Arc<AtomicU64>,
) {
    while let Some(task) = rx.recv().await {
        if task.id <= cancel_through.load(Ordering::Acquire) {
            let _ = task.state.compare_exchange(
                QUEUED,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        if task.state.load(Ordering::Acquire) != QUEUED {
            debug!(repo = %path, task = task.id, "skipping cancelled task");
        } else {
            run_task(&inner, &path, task).await;
        }

        {
            let mut lanes = inner.lanes();
            if rx.is_empty() {
                if lanes.get(&path).is_some_and(|lane| lane.id == lane_id) {
                    lanes.remove(&path);
                }
                debug!(repo = %path, "retired task lane");
                return;
            }
        }
    }
}

async fn run_task(inner: &Inner, path: &RepositoryPath, task: QueuedTask) {
    let permit = match inner.permits {
        Some(ref permits) => Arc::clone(permits).acquire_owned().await.ok(),
        None => None,
    };

    if task
        .state
        .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        debug!(repo = %path, task = task.id, kind = ?task.kind, "task started");
        (task.job)().await;
        task.state.store(FINISHED, Ordering::Release);
        debug!(repo = %path, task = task.id, "task finished");
    } else {
        debug!(repo = %path, task = task.id, "skipping cancelled task");
    }
    drop(permit);
}
