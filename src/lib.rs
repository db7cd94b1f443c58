//! Rollcall - Cluster Membership and Coordination
//!
//! A small coordination layer for a cluster of messaging servers. Nodes
//! register with a central directory, heartbeat to stay listed, elect a
//! coordinator by rank and keep their application clocks aligned with
//! Berkeley synchronization. A Lamport clock rides on every message.
//!
//! # Components
//!
//! - Directory store with rank assignment, expiry sweep and JSON persistence
//! - Membership service exposing the directory over framed TCP
//! - Highest-rank election with pub/sub announcements
//! - Berkeley clock synchronization driven from a bounded work queue
//! - Node agent with admin and application endpoints
//! - Minimal pub/sub hub for topic-prefixed text frames

pub mod config;
pub mod error;
pub mod clock;
pub mod protocol;
pub mod network;
pub mod directory;
pub mod membership;
pub mod coordination;
pub mod pubsub;
pub mod agent;

pub use config::RollcallConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::RollcallConfig;
    pub use crate::error::{Error, Result};
    pub use crate::clock::{AppClock, LogicalClock};
    pub use crate::protocol::{Envelope, NodeEntry, Payload};
    pub use crate::directory::{DirectoryStore, NodeRecord};
    pub use crate::coordination::{elect, berkeley_average, CoordinatorCell};
    pub use crate::agent::NodeAgent;
}
