//! Coordination Work Queue
//!
//! Elections and synchronization rounds are submitted to a bounded queue
//! and run one at a time by a single worker. A full queue drops the
//! submission; a panicking task is logged and the worker carries on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ClockSynchronizer, CoordinatorCell, ElectionEngine, MemberSource};
use crate::error::{Error, Result};

/// Work the coordination worker knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationTask {
    /// Synchronize if coordinator, else elect if the coordinator is gone
    MaybeSync,
    /// Run a Berkeley round unconditionally
    Synchronize,
    /// Run an election round
    Elect,
}

impl fmt::Display for CoordinationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationTask::MaybeSync => write!(f, "maybe-sync"),
            CoordinationTask::Synchronize => write!(f, "synchronize"),
            CoordinationTask::Elect => write!(f, "elect"),
        }
    }
}

/// Counters shared by the queue and its worker
#[derive(Debug, Default)]
pub struct QueueStats {
    pub submitted: AtomicU64,
    pub dropped: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Something that can execute coordination tasks
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task: CoordinationTask) -> Result<()>;
}

/// Submission side of the work queue
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<CoordinationTask>,
    stats: Arc<QueueStats>,
}

impl TaskQueue {
    /// Submit without waiting; a full queue drops the task
    pub fn submit(&self, task: CoordinationTask) -> Result<()> {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Queued {}", task);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("Coordination queue full, dropped {} ({} dropped so far)", task, dropped);
                Err(Error::QueueFull(task.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Queue counters
    pub fn stats(&self) -> &Arc<QueueStats> {
        &self.stats
    }
}

/// Create a queue of the given depth and the worker that drains it
pub fn task_queue(depth: usize, executor: Arc<dyn TaskExecutor>) -> (TaskQueue, TaskWorker) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let stats = Arc::new(QueueStats::default());

    let queue = TaskQueue {
        tx,
        stats: Arc::clone(&stats),
    };
    let worker = TaskWorker {
        rx,
        executor,
        stats,
    };
    (queue, worker)
}

/// Drains the queue, one task at a time
pub struct TaskWorker {
    rx: mpsc::Receiver<CoordinationTask>,
    executor: Arc<dyn TaskExecutor>,
    stats: Arc<QueueStats>,
}

impl TaskWorker {
    /// Run until shutdown or until every queue handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let task = tokio::select! {
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let executor = Arc::clone(&self.executor);
            let handle = tokio::spawn(async move { executor.execute(task).await });

            let outcome = tokio::select! {
                outcome = handle => outcome,
                _ = shutdown.cancelled() => break,
            };

            match outcome {
                Ok(Ok(())) => {
                    self.stats.completed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Coordination task {} failed: {}", task, e);
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Coordination task {} aborted: {}", task, e);
                }
            }
        }

        tracing::debug!("Coordination worker stopped");
    }
}

/// Executes coordination tasks for one node
pub struct Coordination {
    /// This node's name
    name: String,
    /// Local coordinator view
    coordinator: Arc<CoordinatorCell>,
    /// Directory snapshots
    members: Arc<dyn MemberSource>,
    /// Election rounds
    election: ElectionEngine,
    /// Berkeley rounds
    synchronizer: ClockSynchronizer,
}

impl Coordination {
    /// Create a new task executor
    pub fn new(
        name: String,
        coordinator: Arc<CoordinatorCell>,
        members: Arc<dyn MemberSource>,
        election: ElectionEngine,
        synchronizer: ClockSynchronizer,
    ) -> Self {
        Self {
            name,
            coordinator,
            members,
            election,
            synchronizer,
        }
    }

    /// Synchronize as coordinator, or elect if the coordinator is gone
    async fn maybe_sync(&self) -> Result<()> {
        if self.coordinator.is(&self.name).await {
            self.synchronizer.synchronize().await?;
            return Ok(());
        }

        let current = self.coordinator.get().await;
        let listed = self.members.list().await?;
        let present = current
            .as_deref()
            .is_some_and(|name| listed.iter().any(|e| e.name == name));

        if !present {
            tracing::info!(
                "Coordinator {} not in directory, starting election",
                current.as_deref().unwrap_or("(none)")
            );
            self.election.run().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for Coordination {
    async fn execute(&self, task: CoordinationTask) -> Result<()> {
        tracing::debug!("Running {}", task);
        match task {
            CoordinationTask::MaybeSync => self.maybe_sync().await,
            CoordinationTask::Synchronize => self.synchronizer.synchronize().await.map(|_| ()),
            CoordinationTask::Elect => self.election.run().await.map(|_| ()),
        }
    }
}
