//! Application Endpoint
//!
//! The node's main request/reply loop. Applies the logical clock to every
//! request and reply and asks the coordination worker to consider a sync
//! round every few replies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;

use super::ApplicationHandler;
use crate::clock::LogicalClock;
use crate::coordination::{CoordinationTask, TaskQueue};
use crate::error::Error;
use crate::network::RequestHandler;
use crate::protocol::Envelope;

/// Main endpoint request handler
pub struct ApplicationEndpoint {
    services: Arc<dyn ApplicationHandler>,
    logical: Arc<LogicalClock>,
    queue: TaskQueue,
    /// Submit `MaybeSync` after this many replies; 0 disables
    sync_every: u64,
    replies: AtomicU64,
}

impl ApplicationEndpoint {
    /// Create a new endpoint
    pub fn new(
        services: Arc<dyn ApplicationHandler>,
        logical: Arc<LogicalClock>,
        queue: TaskQueue,
        sync_every: u64,
    ) -> Self {
        Self {
            services,
            logical,
            queue,
            sync_every,
            replies: AtomicU64::new(0),
        }
    }

    /// Replies sent so far
    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    /// Stamp a reply and account for it
    fn finish(&self, reply: Envelope) -> Envelope {
        let reply = reply.stamped().with_clock(self.logical.tick());

        let count = self.replies.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sync_every > 0 && count % self.sync_every == 0 {
            // Drops are logged and counted by the queue
            let _ = self.queue.submit(CoordinationTask::MaybeSync);
        }
        reply
    }
}

#[async_trait]
impl RequestHandler for ApplicationEndpoint {
    async fn handle(&self, peer: &str, request: Envelope) -> Envelope {
        self.logical.observe(request.clock());

        let reply = match self.services.handle(&request).await {
            Ok(reply) => reply,
            Err(Error::UnknownService(name)) => {
                tracing::debug!("Unknown service {:?} from {}", name, peer);
                Envelope::error("unknown service")
            }
            Err(e) => {
                tracing::warn!("{} request from {} failed: {}", request.service, peer, e);
                Envelope::error(e.to_string())
            }
        };

        self.finish(reply)
    }

    fn invalid_payload(&self, reason: &str) -> Envelope {
        tracing::debug!("Invalid payload: {}", reason);
        self.finish(Envelope::error("invalid payload"))
    }
}
