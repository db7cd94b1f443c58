//! Admin Endpoint
//!
//! Peer-facing services of a node: `clock` reports or adjusts the
//! application time, `election` reports or overrides the coordinator.

use std::sync::Arc;
use async_trait::async_trait;

use crate::clock::{AppClock, LogicalClock};
use crate::coordination::CoordinatorCell;
use crate::network::RequestHandler;
use crate::protocol::{service, Envelope, Payload};

/// Handler for the node admin port
pub struct AdminHandler {
    app_clock: Arc<AppClock>,
    logical: Arc<LogicalClock>,
    coordinator: Arc<CoordinatorCell>,
}

impl AdminHandler {
    /// Create a new admin handler
    pub fn new(
        app_clock: Arc<AppClock>,
        logical: Arc<LogicalClock>,
        coordinator: Arc<CoordinatorCell>,
    ) -> Self {
        Self {
            app_clock,
            logical,
            coordinator,
        }
    }

    async fn dispatch(&self, peer: &str, request: Envelope) -> Envelope {
        match request.service.as_str() {
            service::CLOCK => {
                if let Some(time) = request.data.time {
                    tracing::info!("Clock adjusted to {:.3} by {}", time, peer);
                    self.app_clock.set(time);
                }
                Envelope::new(
                    service::CLOCK,
                    Payload {
                        time: Some(self.app_clock.now()),
                        ..Default::default()
                    },
                )
            }
            service::ELECTION => match request.data.coordinator {
                Some(coordinator) if !coordinator.is_empty() => {
                    self.coordinator.set(coordinator).await;
                    Envelope::new(
                        service::ELECTION,
                        Payload {
                            coordinator: self.coordinator.get().await,
                            ..Default::default()
                        },
                    )
                }
                _ => Envelope::new(
                    service::ELECTION,
                    Payload {
                        election: Some("OK".to_string()),
                        coordinator: self.coordinator.get().await,
                        ..Default::default()
                    },
                ),
            },
            other => {
                tracing::debug!("Unknown admin service {:?} from {}", other, peer);
                Envelope::error("unknown service")
            }
        }
    }
}

#[async_trait]
impl RequestHandler for AdminHandler {
    async fn handle(&self, peer: &str, request: Envelope) -> Envelope {
        self.logical.observe(request.clock());
        self.dispatch(peer, request)
            .await
            .stamped()
            .with_clock(self.logical.tick())
    }

    fn invalid_payload(&self, reason: &str) -> Envelope {
        tracing::debug!("Invalid admin payload: {}", reason);
        Envelope::error("invalid payload")
            .stamped()
            .with_clock(self.logical.tick())
    }
}
