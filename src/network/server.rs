//! Request/Reply Server
//!
//! TCP server that answers every decoded request with exactly one reply.
//! Frames no codec understands get an `error` reply instead of a dropped
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::{is_disconnect, read_frame, write_envelope};
use crate::protocol::{CodecChain, Envelope};
use crate::error::{Error, Result};

/// Something that turns a request into a reply
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one decoded request; must always produce a reply
    async fn handle(&self, peer: &str, request: Envelope) -> Envelope;

    /// Reply sent for a frame that could not be decoded
    fn invalid_payload(&self, reason: &str) -> Envelope {
        tracing::debug!("Invalid payload: {}", reason);
        Envelope::error("invalid payload").stamped().with_clock(0)
    }
}

/// Request/reply server bound to a TCP port
pub struct RpcServer {
    /// Bound listener
    listener: TcpListener,
    /// Request handler
    handler: Arc<dyn RequestHandler>,
    /// Codecs for requests and replies
    codecs: Arc<CodecChain>,
    /// Shutdown signal
    shutdown: CancellationToken,
    /// Name used in logs
    label: &'static str,
}

impl RpcServer {
    /// Bind a new server
    pub async fn bind(
        label: &'static str,
        bind_address: &str,
        handler: Arc<dyn RequestHandler>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await.map_err(|e| {
            Error::Network(format!("{} failed to bind {}: {}", label, bind_address, e))
        })?;

        Ok(Self {
            listener,
            handler,
            codecs: Arc::new(CodecChain::standard()),
            shutdown,
            label,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    pub async fn serve(self) -> Result<()> {
        tracing::info!("{} listening on {}", self.label, self.local_addr()?);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let handler = Arc::clone(&self.handler);
                            let codecs = Arc::clone(&self.codecs);
                            let shutdown = self.shutdown.clone();
                            let label = self.label;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer_addr, handler, codecs, shutdown).await {
                                    tracing::warn!("{} connection error from {}: {}", label, peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("{} accept error: {}", self.label, e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }

        tracing::info!("{} stopped", self.label);
        Ok(())
    }
}

/// How long to drain an unaligned connection before closing it
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Serve one connection: one reply per request, until the peer hangs up
async fn handle_connection(
    socket: TcpStream,
    peer_addr: &str,
    handler: Arc<dyn RequestHandler>,
    codecs: Arc<CodecChain>,
    shutdown: CancellationToken,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = shutdown.cancelled() => break,
        };

        let reply = match frame {
            Ok(body) => match codecs.decode(&body) {
                Ok(request) => {
                    tracing::trace!("Received {} from {}", request.service, peer_addr);
                    handler.handle(peer_addr, request).await
                }
                Err(e) => handler.invalid_payload(&e.to_string()),
            },
            Err(ref e) if is_disconnect(e) => break,
            Err(e) if e.is_decode_error() => handler.invalid_payload(&e.to_string()),
            Err(e @ Error::FrameTooLarge { .. }) => {
                // The stream cannot be realigned: answer once, then close
                tracing::debug!("Closing connection from {}: {}", peer_addr, e);
                let reply = handler.invalid_payload(&e.to_string());
                write_envelope(&mut writer, &codecs, &reply).await?;
                writer.shutdown().await?;
                let _ = tokio::time::timeout(
                    DRAIN_TIMEOUT,
                    tokio::io::copy(&mut reader, &mut tokio::io::sink()),
                )
                .await;
                break;
            }
            Err(e) => return Err(e),
        };

        write_envelope(&mut writer, &codecs, &reply).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{read_envelope, write_frame};

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, _peer: &str, request: Envelope) -> Envelope {
            request
        }
    }

    #[tokio::test]
    async fn test_replies_to_each_request_and_to_garbage() {
        let shutdown = CancellationToken::new();
        let server = RpcServer::bind("echo", "127.0.0.1:0", Arc::new(Echo), shutdown.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let codecs = CodecChain::standard();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();

        write_envelope(&mut writer, &codecs, &Envelope::bare("list")).await.unwrap();
        let reply = read_envelope(&mut reader, &codecs).await.unwrap();
        assert_eq!(reply.service, "list");

        // Garbage still gets an answer on the same connection
        write_frame(&mut writer, b"\xc1\xc1 garbage").await.unwrap();
        let reply = read_envelope(&mut reader, &codecs).await.unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.data.message.as_deref(), Some("invalid payload"));

        write_envelope(&mut writer, &codecs, &Envelope::bare("clock")).await.unwrap();
        let reply = read_envelope(&mut reader, &codecs).await.unwrap();
        assert_eq!(reply.service, "clock");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unframed_request_gets_reply_then_close() {
        let shutdown = CancellationToken::new();
        let server = RpcServer::bind("echo", "127.0.0.1:0", Arc::new(Echo), shutdown.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let codecs = CodecChain::standard();
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = stream.into_split();

        // Raw JSON without a frame header reads as a huge length
        writer.write_all(br#"{"service":"list","data":{}}"#).await.unwrap();
        let reply = read_envelope(&mut reader, &codecs).await.unwrap();
        assert!(reply.is_error());
        assert_eq!(reply.data.message.as_deref(), Some("invalid payload"));

        let next = read_envelope(&mut reader, &codecs).await.unwrap_err();
        assert!(crate::network::is_disconnect(&next));

        shutdown.cancel();
    }
}
