//! Directory Store
//!
//! Every operation runs as one critical section: mutate the in-memory
//! map, then persist it by whole-file replacement, all under the same
//! lock. Persistence failures are logged and the in-memory state stands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::NodeRecord;
use crate::clock::unix_now;
use crate::protocol::NodeEntry;

/// Authoritative node directory
pub struct DirectoryStore {
    /// Backing file; `None` keeps the directory in memory only
    path: Option<PathBuf>,
    /// Records by name
    records: Mutex<HashMap<String, NodeRecord>>,
    /// Records silent for longer than this are swept
    heartbeat_timeout: Duration,
}

impl DirectoryStore {
    /// Open a directory backed by `path`
    ///
    /// A missing file is an empty directory. Unreadable or malformed
    /// content is logged and also treated as empty.
    pub fn open(path: PathBuf, heartbeat_timeout: Duration) -> Self {
        let records = load_records(&path);
        tracing::info!(
            "Directory loaded {} record(s) from {}",
            records.len(),
            path.display()
        );

        Self {
            path: Some(path),
            records: Mutex::new(records),
            heartbeat_timeout,
        }
    }

    /// Create a directory that is never persisted
    pub fn in_memory(heartbeat_timeout: Duration) -> Self {
        Self {
            path: None,
            records: Mutex::new(HashMap::new()),
            heartbeat_timeout,
        }
    }

    /// Expiry threshold
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Register `name` (or refresh it) and return its rank
    pub async fn rank(&self, name: &str, address: Option<&str>) -> u32 {
        self.rank_at(name, address, unix_now()).await
    }

    /// `rank` evaluated at time `now`
    pub async fn rank_at(&self, name: &str, address: Option<&str>, now: f64) -> u32 {
        let mut records = self.records.lock().await;
        let rank = upsert(&mut records, name, address, now);
        self.persist(&records).await;
        rank
    }

    /// Record liveness for `name`, registering it if unknown
    pub async fn heartbeat(&self, name: &str, address: Option<&str>) {
        self.heartbeat_at(name, address, unix_now()).await
    }

    /// `heartbeat` evaluated at time `now`
    pub async fn heartbeat_at(&self, name: &str, address: Option<&str>, now: f64) {
        let mut records = self.records.lock().await;
        let rank = upsert(&mut records, name, address, now);
        tracing::trace!("Heartbeat from {} (rank {})", name, rank);
        self.persist(&records).await;
    }

    /// Sweep expired records and return the live ones, ordered by rank
    pub async fn list(&self) -> Vec<NodeEntry> {
        self.list_at(unix_now()).await
    }

    /// `list` evaluated at time `now`
    pub async fn list_at(&self, now: f64) -> Vec<NodeEntry> {
        let mut records = self.records.lock().await;
        self.sweep(&mut records, now);
        self.persist(&records).await;

        let mut entries: Vec<NodeEntry> = records.values().map(NodeRecord::entry).collect();
        entries.sort_by_key(|e| e.rank);
        entries
    }

    /// Sweep expired records; returns how many were removed
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(unix_now()).await
    }

    /// `cleanup` evaluated at time `now`
    pub async fn cleanup_at(&self, now: f64) -> usize {
        let mut records = self.records.lock().await;
        let removed = self.sweep(&mut records, now);
        self.persist(&records).await;
        removed
    }

    /// Full record for one node, expired or not
    pub async fn get(&self, name: &str) -> Option<NodeRecord> {
        self.records.lock().await.get(name).cloned()
    }

    /// Number of records currently held (including not-yet-swept ones)
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the directory holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Remove records silent for longer than the timeout
    fn sweep(&self, records: &mut HashMap<String, NodeRecord>, now: f64) -> usize {
        let timeout = self.heartbeat_timeout.as_secs_f64();
        let before = records.len();

        records.retain(|name, record| {
            let keep = !record.is_expired(now, timeout);
            if !keep {
                tracing::info!(
                    "Expiring {} (rank {}), silent for {:.1}s",
                    name,
                    record.rank,
                    now - record.last_seen
                );
            }
            keep
        });

        before - records.len()
    }

    /// Write the whole directory, replacing the previous file
    async fn persist(&self, records: &HashMap<String, NodeRecord>) {
        let Some(path) = &self.path else {
            return;
        };

        let mut ordered: Vec<&NodeRecord> = records.values().collect();
        ordered.sort_by_key(|r| r.rank);

        let body = match serde_json::to_vec_pretty(&ordered) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to serialize directory: {}", e);
                return;
            }
        };

        if let Err(e) = write_replace(path, &body).await {
            tracing::warn!("Failed to persist directory to {}: {}", path.display(), e);
        }
    }
}

/// Insert-or-touch; returns the rank of `name`
fn upsert(
    records: &mut HashMap<String, NodeRecord>,
    name: &str,
    address: Option<&str>,
    now: f64,
) -> u32 {
    let address = address.filter(|a| !a.is_empty());

    if let Some(record) = records.get_mut(name) {
        if let Some(addr) = address {
            record.address = Some(addr.to_string());
        }
        record.touch(now);
        return record.rank;
    }

    let rank = assign_rank(records);
    tracing::info!("Registered {} with rank {}", name, rank);
    records.insert(
        name.to_string(),
        NodeRecord::new(name.to_string(), rank, address.map(str::to_string), now),
    );
    rank
}

/// Smallest positive rank not held by any record
fn assign_rank(records: &HashMap<String, NodeRecord>) -> u32 {
    let mut used: Vec<u32> = records.values().map(|r| r.rank).collect();
    used.sort_unstable();

    let mut candidate = 1;
    for rank in used {
        if rank == candidate {
            candidate += 1;
        } else if rank > candidate {
            break;
        }
    }
    candidate
}

/// Read the persisted directory; anything unusable yields an empty map
fn load_records(path: &Path) -> HashMap<String, NodeRecord> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read directory {}: {}", path.display(), e);
            return HashMap::new();
        }
    };

    match serde_json::from_slice::<Vec<NodeRecord>>(&content) {
        Ok(list) => {
            let mut records = HashMap::with_capacity(list.len());
            for record in list {
                if record.name.is_empty() || record.rank == 0 {
                    continue;
                }
                // Later duplicates lose; the file should never hold any
                records.entry(record.name.clone()).or_insert(record);
            }
            records
        }
        Err(e) => {
            tracing::warn!(
                "Directory file {} is malformed ({}), starting empty",
                path.display(),
                e
            );
            HashMap::new()
        }
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_replace(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}
