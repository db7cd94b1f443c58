//! Directory Client
//!
//! The node side of the membership protocol. Every request ticks the
//! logical clock and every reply is merged into it.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;

use crate::clock::LogicalClock;
use crate::coordination::MemberSource;
use crate::error::{Error, Result};
use crate::network::PeerTransport;
use crate::protocol::{service, Envelope, NodeEntry, Payload};

/// Client for the membership service
pub struct DirectoryClient {
    /// Membership service address
    address: String,
    /// Request transport
    transport: Arc<dyn PeerTransport>,
    /// This node's logical clock
    logical: Arc<LogicalClock>,
    /// Per-request deadline
    limit: Duration,
}

impl DirectoryClient {
    /// Create a new directory client
    pub fn new(
        address: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
        logical: Arc<LogicalClock>,
        limit: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            transport,
            logical,
            limit,
        }
    }

    /// Membership service address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request under the clock discipline
    async fn call(&self, service: &str, data: Payload) -> Result<Envelope> {
        let request = Envelope::new(service, data)
            .stamped()
            .with_clock(self.logical.tick());

        let reply = self
            .transport
            .request(&self.address, request, self.limit)
            .await?;
        self.logical.observe(reply.clock());

        reply.expect_service(service)
    }

    /// Obtain this node's rank
    pub async fn rank(&self, name: &str, address: Option<&str>) -> Result<u32> {
        let reply = self
            .call(
                service::RANK,
                Payload {
                    user: Some(name.to_string()),
                    address: address.map(str::to_string),
                    ..Default::default()
                },
            )
            .await?;

        reply.data.rank.filter(|r| *r > 0).ok_or(Error::MissingField {
            service: service::RANK.to_string(),
            field: "rank",
        })
    }

    /// Report liveness
    pub async fn heartbeat(&self, name: &str, address: Option<&str>) -> Result<()> {
        self.call(
            service::HEARTBEAT,
            Payload {
                user: Some(name.to_string()),
                address: address.map(str::to_string),
                ..Default::default()
            },
        )
        .await?;
        Ok(())
    }

    /// Fetch the live membership
    pub async fn list(&self) -> Result<Vec<NodeEntry>> {
        let reply = self.call(service::LIST, Payload::default()).await?;
        Ok(reply.data.list.unwrap_or_default())
    }
}

#[async_trait]
impl MemberSource for DirectoryClient {
    async fn list(&self) -> Result<Vec<NodeEntry>> {
        DirectoryClient::list(self).await
    }
}
