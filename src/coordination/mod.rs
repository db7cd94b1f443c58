//! Coordination Module
//!
//! Leader election, Berkeley clock synchronization and the work queue
//! that runs them off the serving loops.

mod berkeley;
mod coordinator;
mod election;
mod tasks;

pub use berkeley::{berkeley_average, ClockSynchronizer};
pub use coordinator::CoordinatorCell;
pub use election::{elect, ElectionEngine};
pub use tasks::{
    task_queue, Coordination, CoordinationTask, QueueStats, TaskExecutor, TaskQueue, TaskWorker,
};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{Envelope, NodeEntry};

/// Source of directory snapshots
#[async_trait]
pub trait MemberSource: Send + Sync {
    /// Current live members, ordered by rank
    async fn list(&self) -> Result<Vec<NodeEntry>>;
}

/// Sink for election announcements
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Broadcast `announcement` to every subscribed node
    async fn announce(&self, announcement: &Envelope) -> Result<()>;
}
