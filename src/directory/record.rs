//! Directory Records

use serde::{Deserialize, Serialize};

use crate::protocol::NodeEntry;

/// One registered node as persisted by the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique node name
    pub name: String,
    /// Registration slot, unique among live records
    pub rank: u32,
    /// Admin address (host:port), if the node reported one
    #[serde(default)]
    pub address: Option<String>,
    /// Last contact, seconds since the epoch
    #[serde(default)]
    pub last_seen: f64,
}

impl NodeRecord {
    /// Create a record first seen at `now`
    pub fn new(name: String, rank: u32, address: Option<String>, now: f64) -> Self {
        Self {
            name,
            rank,
            address,
            last_seen: now,
        }
    }

    /// Refresh liveness; never moves `last_seen` backwards
    pub fn touch(&mut self, now: f64) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// Whether the record has been silent for longer than `timeout_secs`
    pub fn is_expired(&self, now: f64, timeout_secs: f64) -> bool {
        now - self.last_seen > timeout_secs
    }

    /// The simplified view handed out by `list`
    pub fn entry(&self) -> NodeEntry {
        NodeEntry {
            name: self.name.clone(),
            rank: self.rank,
            address: self.address.clone(),
        }
    }
}
