//! Leader Election
//!
//! Every node runs the same rule on its own directory snapshot: the
//! highest rank wins. Winners are announced on the pub/sub channel and
//! subscribers adopt whatever they hear last.

use std::sync::Arc;

use super::{Announcer, CoordinatorCell, MemberSource};
use crate::clock::LogicalClock;
use crate::error::Result;
use crate::protocol::{service, Envelope, NodeEntry, Payload};

/// Pick the coordinator from a snapshot: maximum rank, none if empty
pub fn elect(entries: &[NodeEntry]) -> Option<&NodeEntry> {
    entries
        .iter()
        .max_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.name.cmp(&b.name)))
}

/// Runs an election round and announces the result
pub struct ElectionEngine {
    /// Directory snapshots
    members: Arc<dyn MemberSource>,
    /// Local coordinator view
    coordinator: Arc<CoordinatorCell>,
    /// Announcement channel
    announcer: Arc<dyn Announcer>,
    /// Stamps the announcement
    logical: Arc<LogicalClock>,
}

impl ElectionEngine {
    /// Create a new election engine
    pub fn new(
        members: Arc<dyn MemberSource>,
        coordinator: Arc<CoordinatorCell>,
        announcer: Arc<dyn Announcer>,
        logical: Arc<LogicalClock>,
    ) -> Self {
        Self {
            members,
            coordinator,
            announcer,
            logical,
        }
    }

    /// Run one round; returns the winner, if there was one
    ///
    /// An empty snapshot leaves the coordinator view untouched. A failed
    /// announcement is logged; the local view is already updated.
    pub async fn run(&self) -> Result<Option<String>> {
        let snapshot = self.members.list().await?;

        let Some(winner) = elect(&snapshot) else {
            tracing::info!("Election found no live nodes, keeping current view");
            return Ok(None);
        };
        let winner = winner.name.clone();

        tracing::info!(
            "Election over {} node(s): {} wins",
            snapshot.len(),
            winner
        );
        self.coordinator.set(winner.clone()).await;

        let announcement = Envelope::new(
            service::ELECTION,
            Payload {
                coordinator: Some(winner.clone()),
                ..Default::default()
            },
        )
        .stamped()
        .with_clock(self.logical.tick());

        if let Err(e) = self.announcer.announce(&announcement).await {
            tracing::warn!("Failed to announce coordinator {}: {}", winner, e);
        }

        Ok(Some(winner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn entry(name: &str, rank: u32) -> NodeEntry {
        NodeEntry {
            name: name.into(),
            rank,
            address: None,
        }
    }

    struct Snapshot(Vec<NodeEntry>);

    #[async_trait]
    impl MemberSource for Snapshot {
        async fn list(&self) -> Result<Vec<NodeEntry>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
        fail: bool,
    }

    #[async_trait]
    impl Announcer for Recorder {
        async fn announce(&self, announcement: &Envelope) -> Result<()> {
            if self.fail {
                return Err(Error::Network("hub down".into()));
            }
            self.sent.lock().unwrap().push(announcement.clone());
            Ok(())
        }
    }

    fn engine(entries: Vec<NodeEntry>, announcer: Arc<Recorder>) -> (ElectionEngine, Arc<CoordinatorCell>) {
        let cell = Arc::new(CoordinatorCell::new());
        let engine = ElectionEngine::new(
            Arc::new(Snapshot(entries)),
            Arc::clone(&cell),
            announcer,
            Arc::new(LogicalClock::new()),
        );
        (engine, cell)
    }

    #[test]
    fn test_highest_rank_wins() {
        let entries = vec![entry("A", 3), entry("B", 7), entry("C", 5)];
        assert_eq!(elect(&entries).unwrap().name, "B");
    }

    #[test]
    fn test_elect_is_order_independent() {
        let mut entries = vec![entry("A", 3), entry("B", 7), entry("C", 5)];
        entries.reverse();
        assert_eq!(elect(&entries).unwrap().name, "B");
        assert!(elect(&[]).is_none());
    }

    #[tokio::test]
    async fn test_round_sets_view_and_announces() {
        let recorder = Arc::new(Recorder::default());
        let (engine, cell) = engine(
            vec![entry("servidor1", 1), entry("servidor2", 2)],
            Arc::clone(&recorder),
        );

        assert_eq!(engine.run().await.unwrap().as_deref(), Some("servidor2"));
        assert_eq!(cell.get().await.as_deref(), Some("servidor2"));

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].service, "election");
        assert_eq!(sent[0].data.coordinator.as_deref(), Some("servidor2"));
        assert_eq!(sent[0].clock(), Some(1));
    }

    #[tokio::test]
    async fn test_empty_snapshot_keeps_view() {
        let recorder = Arc::new(Recorder::default());
        let (engine, cell) = engine(Vec::new(), Arc::clone(&recorder));
        cell.set("servidor9").await;

        assert_eq!(engine.run().await.unwrap(), None);
        assert_eq!(cell.get().await.as_deref(), Some("servidor9"));
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_announcement_still_elects() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let (engine, cell) = engine(vec![entry("servidor1", 1)], recorder);

        assert_eq!(engine.run().await.unwrap().as_deref(), Some("servidor1"));
        assert_eq!(cell.get().await.as_deref(), Some("servidor1"));
    }
}
