//! Berkeley Clock Synchronization
//!
//! The coordinator polls every listed peer for its application time,
//! averages the answers together with its own reading, adopts the mean
//! and tells everyone else to do the same. Peers that do not answer in
//! time are left out of the average. No outlier rejection.

use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;

use super::MemberSource;
use crate::clock::{AppClock, LogicalClock};
use crate::directory::peer_address;
use crate::error::{Error, Result};
use crate::network::PeerTransport;
use crate::protocol::{service, Envelope, Payload};

/// Mean of the samples that arrived
///
/// `None` if none did, or if the mean itself is not finite.
pub fn berkeley_average(samples: &[Option<f64>]) -> Option<f64> {
    let collected: Vec<f64> = samples
        .iter()
        .flatten()
        .copied()
        .filter(|t| t.is_finite())
        .collect();

    if collected.is_empty() {
        return None;
    }
    let mean = collected.iter().sum::<f64>() / collected.len() as f64;
    mean.is_finite().then_some(mean)
}

/// Coordinator side of Berkeley synchronization
pub struct ClockSynchronizer {
    /// This node's name, excluded from polling
    name: String,
    /// Directory snapshots
    members: Arc<dyn MemberSource>,
    /// Point-to-point requests to peers
    transport: Arc<dyn PeerTransport>,
    /// Application time being synchronized
    app_clock: Arc<AppClock>,
    /// Logical clock stamped on every request
    logical: Arc<LogicalClock>,
    /// Base for derived admin ports
    admin_base_port: u16,
    /// Per-peer deadline
    peer_timeout: Duration,
}

impl ClockSynchronizer {
    /// Create a new synchronizer
    pub fn new(
        name: String,
        members: Arc<dyn MemberSource>,
        transport: Arc<dyn PeerTransport>,
        app_clock: Arc<AppClock>,
        logical: Arc<LogicalClock>,
        admin_base_port: u16,
        peer_timeout: Duration,
    ) -> Self {
        Self {
            name,
            members,
            transport,
            app_clock,
            logical,
            admin_base_port,
            peer_timeout,
        }
    }

    /// Run one synchronization round; returns the adopted time
    pub async fn synchronize(&self) -> Result<Option<f64>> {
        let snapshot = self.members.list().await?;
        let peers: Vec<String> = snapshot
            .iter()
            .filter(|entry| entry.name != self.name)
            .filter_map(|entry| match peer_address(entry, self.admin_base_port) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!("Skipping {} in clock sync: {}", entry.name, e);
                    None
                }
            })
            .collect();

        let mut samples = vec![Some(self.app_clock.now())];
        let polls = peers.iter().map(|addr| self.poll(addr));
        samples.extend(join_all(polls).await);

        let answered = samples.iter().filter(|s| s.is_some()).count();
        let Some(average) = berkeley_average(&samples) else {
            tracing::warn!("Clock sync produced no usable average, aborting");
            return Ok(None);
        };

        tracing::info!(
            "Clock sync: {}/{} sample(s), adopting {:.3}",
            answered,
            samples.len(),
            average
        );
        self.app_clock.set(average);

        let adjustments = peers.iter().map(|addr| self.adjust(addr, average));
        join_all(adjustments).await;

        Ok(Some(average))
    }

    /// Ask one peer for its application time
    async fn poll(&self, address: &str) -> Option<f64> {
        let request = Envelope::bare(service::CLOCK)
            .stamped()
            .with_clock(self.logical.tick());

        match self.fetch_time(address, request).await {
            Ok(time) => Some(time),
            Err(e) => {
                tracing::debug!("Excluding {} from clock sync: {}", address, e);
                None
            }
        }
    }

    async fn fetch_time(&self, address: &str, request: Envelope) -> Result<f64> {
        let reply = self
            .transport
            .request(address, request, self.peer_timeout)
            .await?;
        self.logical.observe(reply.clock());

        let reply = reply.expect_service(service::CLOCK)?;
        match reply.data.time {
            Some(time) if time.is_finite() => Ok(time),
            _ => Err(Error::MissingField {
                service: service::CLOCK.to_string(),
                field: "time",
            }),
        }
    }

    /// Instruct one peer to adopt `time`; the reply only feeds the clock
    async fn adjust(&self, address: &str, time: f64) {
        let request = Envelope::new(
            service::CLOCK,
            Payload {
                time: Some(time),
                ..Default::default()
            },
        )
        .stamped()
        .with_clock(self.logical.tick());

        match self
            .transport
            .request(address, request, self.peer_timeout)
            .await
        {
            Ok(reply) => {
                self.logical.observe(reply.clock());
            }
            Err(e) => tracing::debug!("Clock adjustment to {} not confirmed: {}", address, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeEntry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_average_of_all_samples() {
        assert_eq!(berkeley_average(&[Some(100.0), Some(102.0), Some(98.0)]), Some(100.0));
    }

    #[test]
    fn test_average_skips_missing() {
        assert_eq!(berkeley_average(&[Some(100.0), None, Some(98.0)]), Some(99.0));
        assert_eq!(berkeley_average(&[None, None]), None);
        assert_eq!(berkeley_average(&[]), None);
    }

    #[test]
    fn test_average_overflow_is_unusable() {
        assert_eq!(berkeley_average(&[Some(1e308), Some(1e308)]), None);
        assert_eq!(berkeley_average(&[Some(f64::INFINITY), Some(10.0)]), Some(10.0));
    }

    struct Snapshot(Vec<NodeEntry>);

    #[async_trait]
    impl MemberSource for Snapshot {
        async fn list(&self) -> Result<Vec<NodeEntry>> {
            Ok(self.0.clone())
        }
    }

    /// Peers by address: `Some(t)` answers with `t`, `None` times out
    struct FakePeers {
        times: HashMap<String, Option<f64>>,
        adjusted: Mutex<Vec<(String, f64)>>,
    }

    #[async_trait]
    impl PeerTransport for FakePeers {
        async fn request(&self, address: &str, request: Envelope, _limit: Duration) -> Result<Envelope> {
            let Some(Some(time)) = self.times.get(address) else {
                return Err(Error::ConnectionTimeout(address.to_string()));
            };
            if let Some(new_time) = request.data.time {
                self.adjusted.lock().unwrap().push((address.to_string(), new_time));
            }
            Ok(Envelope::new(
                service::CLOCK,
                Payload {
                    time: Some(*time),
                    ..Default::default()
                },
            )
            .with_clock(50))
        }
    }

    fn entry(name: &str, rank: u32) -> NodeEntry {
        NodeEntry {
            name: name.into(),
            rank,
            address: None,
        }
    }

    fn synchronizer(peers: Arc<FakePeers>, own_time: f64) -> (ClockSynchronizer, Arc<AppClock>, Arc<LogicalClock>) {
        let app_clock = Arc::new(AppClock::new());
        app_clock.set(own_time);
        let logical = Arc::new(LogicalClock::new());
        let members = Snapshot(vec![entry("s1", 1), entry("s2", 2), entry("s3", 3)]);

        let sync = ClockSynchronizer::new(
            "s3".into(),
            Arc::new(members),
            peers,
            Arc::clone(&app_clock),
            Arc::clone(&logical),
            5600,
            Duration::from_millis(100),
        );
        (sync, app_clock, logical)
    }

    #[tokio::test]
    async fn test_round_excludes_silent_peer() {
        let peers = Arc::new(FakePeers {
            times: HashMap::from([
                ("s1:5601".to_string(), Some(1_000_100.0)),
                ("s2:5602".to_string(), None),
            ]),
            adjusted: Mutex::new(Vec::new()),
        });
        let (sync, app_clock, logical) = synchronizer(Arc::clone(&peers), 1_000_098.0);

        let average = sync.synchronize().await.unwrap().unwrap();
        assert!((average - 1_000_099.0).abs() < 0.5);
        assert!((app_clock.now() - 1_000_099.0).abs() < 0.5);

        // Only the live peer saw the adjustment
        let adjusted = peers.adjusted.lock().unwrap();
        assert_eq!(adjusted.len(), 1);
        assert_eq!(adjusted[0].0, "s1:5601");

        // Merged the peer's clock
        assert!(logical.current() >= 50);
    }

    #[tokio::test]
    async fn test_overflowing_samples_adjust_nobody() {
        let peers = Arc::new(FakePeers {
            times: HashMap::from([
                ("s1:5601".to_string(), Some(1e308)),
                ("s2:5602".to_string(), Some(1e308)),
            ]),
            adjusted: Mutex::new(Vec::new()),
        });
        let (sync, app_clock, _) = synchronizer(Arc::clone(&peers), 1_000_000.0);

        assert_eq!(sync.synchronize().await.unwrap(), None);
        assert!((app_clock.now() - 1_000_000.0).abs() < 0.5);
        assert!(peers.adjusted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lone_coordinator_keeps_own_time() {
        let peers = Arc::new(FakePeers {
            times: HashMap::new(),
            adjusted: Mutex::new(Vec::new()),
        });
        let (sync, app_clock, _) = synchronizer(peers, 2_000_000.0);

        let average = sync.synchronize().await.unwrap().unwrap();
        assert!((average - 2_000_000.0).abs() < 0.5);
        assert!((app_clock.now() - 2_000_000.0).abs() < 0.5);
    }
}
