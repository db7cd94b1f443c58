//! Publisher
//!
//! Every publish opens a connection to the hub, sends one
//! `"<topic> <payload>"` frame and closes it.

use std::time::Duration;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::coordination::Announcer;
use crate::error::{Error, Result};
use crate::network::write_frame;
use crate::protocol::Envelope;

/// Short-lived-connection publisher
#[derive(Debug, Clone)]
pub struct Publisher {
    /// Hub publisher port
    address: String,
    /// Topic used for announcements
    topic: String,
    /// Connect and send deadline
    limit: Duration,
}

impl Publisher {
    /// Create a publisher for the hub at `address`
    pub fn new(address: impl Into<String>, topic: impl Into<String>, limit: Duration) -> Self {
        Self {
            address: address.into(),
            topic: topic.into(),
            limit,
        }
    }

    /// Publish raw text under `topic`
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let frame = format!("{} {}", topic, payload);

        let send = async {
            let mut stream = TcpStream::connect(&self.address).await.map_err(|e| {
                Error::ConnectionFailed {
                    address: self.address.clone(),
                    reason: e.to_string(),
                }
            })?;
            write_frame(&mut stream, frame.as_bytes()).await?;
            stream.shutdown().await?;
            Ok::<_, Error>(())
        };

        match timeout(self.limit, send).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout(self.address.clone())),
        }?;

        tracing::debug!("Published on {}: {}", topic, payload);
        Ok(())
    }

    /// Publish an envelope as JSON under `topic`
    pub async fn publish_envelope(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)?;
        self.publish(topic, &payload).await
    }
}

#[async_trait]
impl Announcer for Publisher {
    async fn announce(&self, announcement: &Envelope) -> Result<()> {
        self.publish_envelope(&self.topic, announcement).await
    }
}
