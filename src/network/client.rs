//! Request Client
//!
//! One-shot request/reply: every call opens a connection, performs one
//! round trip and closes it.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_envelope, write_envelope};
use crate::protocol::{CodecChain, Envelope};
use crate::error::{Error, Result};

/// Point-to-point request capability
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send `request` to `address` and wait at most `limit` for the reply
    async fn request(&self, address: &str, request: Envelope, limit: Duration) -> Result<Envelope>;
}

/// Short-lived-connection client
#[derive(Clone)]
pub struct RpcClient {
    /// Codecs for requests and replies
    codecs: Arc<CodecChain>,
    /// Connection timeout
    connect_timeout: Duration,
}

impl RpcClient {
    /// Create a new client
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            codecs: Arc::new(CodecChain::standard()),
            connect_timeout,
        }
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    /// Round trip without the overall deadline
    async fn round_trip(&self, address: &str, request: &Envelope) -> Result<Envelope> {
        let mut stream = self.connect(address).await?;
        let (mut reader, mut writer) = stream.split();

        write_envelope(&mut writer, &self.codecs, request).await?;
        read_envelope(&mut reader, &self.codecs).await
    }
}

#[async_trait]
impl PeerTransport for RpcClient {
    async fn request(&self, address: &str, request: Envelope, limit: Duration) -> Result<Envelope> {
        tracing::trace!("Sending {} to {}", request.service, address);

        match timeout(limit, self.round_trip(address, &request)).await {
            Ok(inner) => inner,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{RequestHandler, RpcServer};
    use tokio_util::sync::CancellationToken;

    struct Fixed;

    #[async_trait]
    impl RequestHandler for Fixed {
        async fn handle(&self, _peer: &str, _request: Envelope) -> Envelope {
            Envelope::bare("heartbeat").with_clock(9)
        }
    }

    struct Silent;

    #[async_trait]
    impl RequestHandler for Silent {
        async fn handle(&self, _peer: &str, request: Envelope) -> Envelope {
            tokio::time::sleep(Duration::from_secs(5)).await;
            request
        }
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let client = RpcClient::new(Duration::from_millis(100));

        // Nothing listens on port 1
        let result = client
            .request("127.0.0.1:1", Envelope::bare("list"), Duration::from_millis(500))
            .await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let shutdown = CancellationToken::new();
        let server = RpcServer::bind("fixed", "127.0.0.1:0", Arc::new(Fixed), shutdown.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.serve());

        let client = RpcClient::new(Duration::from_millis(500));
        let reply = client
            .request(&addr, Envelope::bare("heartbeat"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.clock(), Some(9));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_slow_peer_times_out() {
        let shutdown = CancellationToken::new();
        let server = RpcServer::bind("silent", "127.0.0.1:0", Arc::new(Silent), shutdown.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.serve());

        let client = RpcClient::new(Duration::from_millis(500));
        let result = client
            .request(&addr, Envelope::bare("clock"), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(Error::ConnectionTimeout(_))));

        shutdown.cancel();
    }
}
