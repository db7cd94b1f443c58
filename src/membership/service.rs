//! Membership Service
//!
//! Request/reply front end of the directory: `rank`, `heartbeat`, `list`,
//! plus the trivial `clock` and `election` services. Replies pass the
//! request's clock straight back; this service keeps no logical clock.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::unix_now;
use crate::coordination::CoordinatorCell;
use crate::directory::DirectoryStore;
use crate::error::{Error, Result};
use crate::network::RequestHandler;
use crate::protocol::{service, Envelope, Payload};

/// Directory request handler
pub struct MembershipService {
    /// Backing directory
    store: Arc<DirectoryStore>,
    /// Last coordinator announced to this service
    coordinator: Arc<CoordinatorCell>,
}

impl MembershipService {
    /// Create a new service over `store`
    pub fn new(store: Arc<DirectoryStore>, coordinator: Arc<CoordinatorCell>) -> Self {
        Self { store, coordinator }
    }

    /// Directory backing this service
    pub fn store(&self) -> &Arc<DirectoryStore> {
        &self.store
    }

    /// Route one request; the reply is not yet stamped
    pub async fn dispatch(&self, request: Envelope) -> Result<Envelope> {
        match request.service.as_str() {
            service::RANK => {
                let user = request.require_user()?;
                let rank = self.store.rank(user, request.data.address.as_deref()).await;
                tracing::debug!("rank: {} -> {}", user, rank);
                Ok(Envelope::new(
                    service::RANK,
                    Payload {
                        rank: Some(rank),
                        ..Default::default()
                    },
                ))
            }
            service::HEARTBEAT => {
                let user = request.require_user()?;
                self.store
                    .heartbeat(user, request.data.address.as_deref())
                    .await;
                Ok(Envelope::bare(service::HEARTBEAT))
            }
            service::LIST => {
                let list = self.store.list().await;
                Ok(Envelope::new(
                    service::LIST,
                    Payload {
                        list: Some(list),
                        ..Default::default()
                    },
                ))
            }
            service::CLOCK => Ok(Envelope::new(
                service::CLOCK,
                Payload {
                    time: Some(unix_now()),
                    ..Default::default()
                },
            )),
            service::ELECTION => {
                let data = match request.data.coordinator {
                    Some(coordinator) if !coordinator.is_empty() => {
                        self.coordinator.set(coordinator.clone()).await;
                        Payload {
                            coordinator: Some(coordinator),
                            ..Default::default()
                        }
                    }
                    _ => Payload {
                        election: Some("OK".to_string()),
                        ..Default::default()
                    },
                };
                Ok(Envelope::new(service::ELECTION, data))
            }
            other => Err(Error::UnknownService(other.to_string())),
        }
    }
}

#[async_trait]
impl RequestHandler for MembershipService {
    async fn handle(&self, peer: &str, request: Envelope) -> Envelope {
        let clock = request.clock().unwrap_or(0);

        let reply = match self.dispatch(request).await {
            Ok(reply) => reply,
            Err(Error::UnknownService(name)) => {
                tracing::debug!("Unknown service {:?} from {}", name, peer);
                Envelope::error("unknown service")
            }
            Err(e) => {
                tracing::debug!("Request from {} failed: {}", peer, e);
                Envelope::error(e.to_string())
            }
        };

        reply.stamped().with_clock(clock)
    }
}

/// Periodically sweep expired records until shutdown
pub fn spawn_sweeper(
    store: Arc<DirectoryStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.cleanup().await;
                    if removed > 0 {
                        tracing::info!("Sweep removed {} expired node(s)", removed);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
