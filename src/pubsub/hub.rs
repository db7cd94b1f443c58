//! Pub/Sub Hub
//!
//! Pure forwarding device. Publishers connect to one port and push
//! frames; subscribers connect to the other, send their topic filter as
//! the first frame, then receive every frame whose text starts with it.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::network::{read_frame, write_frame};

/// Frames buffered per subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 1024;

/// Publisher/subscriber fan-out hub
pub struct PubSubHub {
    /// Publisher-facing listener
    publishers: TcpListener,
    /// Subscriber-facing listener
    subscribers: TcpListener,
    /// Fan-out channel
    tx: broadcast::Sender<Arc<Vec<u8>>>,
    /// Shutdown signal
    shutdown: CancellationToken,
}

impl PubSubHub {
    /// Bind both ports
    pub async fn bind(
        publish_bind: &str,
        subscribe_bind: &str,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let publishers = TcpListener::bind(publish_bind).await.map_err(|e| {
            Error::Network(format!("Hub failed to bind {}: {}", publish_bind, e))
        })?;
        let subscribers = TcpListener::bind(subscribe_bind).await.map_err(|e| {
            Error::Network(format!("Hub failed to bind {}: {}", subscribe_bind, e))
        })?;
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Ok(Self {
            publishers,
            subscribers,
            tx,
            shutdown,
        })
    }

    /// Bound publisher and subscriber addresses
    pub fn local_addrs(&self) -> Result<(SocketAddr, SocketAddr)> {
        Ok((self.publishers.local_addr()?, self.subscribers.local_addr()?))
    }

    /// Forward frames until shutdown
    pub async fn serve(self) -> Result<()> {
        let (pub_addr, sub_addr) = self.local_addrs()?;
        tracing::info!("Pub/sub hub: publishers on {}, subscribers on {}", pub_addr, sub_addr);

        loop {
            tokio::select! {
                result = self.publishers.accept() => match result {
                    Ok((socket, addr)) => {
                        let tx = self.tx.clone();
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pump_publisher(socket, tx, shutdown).await {
                                tracing::debug!("Publisher {} dropped: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Hub accept error: {}", e),
                },
                result = self.subscribers.accept() => match result {
                    Ok((socket, addr)) => {
                        let rx = self.tx.subscribe();
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = feed_subscriber(socket, rx, shutdown).await {
                                tracing::debug!("Subscriber {} dropped: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Hub accept error: {}", e),
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        tracing::info!("Pub/sub hub stopped");
        Ok(())
    }
}

async fn pump_publisher(
    socket: TcpStream,
    tx: broadcast::Sender<Arc<Vec<u8>>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (mut reader, _writer) = socket.into_split();

    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            _ = shutdown.cancelled() => return Ok(()),
        };

        match frame {
            Ok(body) => {
                tracing::trace!("Hub forwarding {} byte(s)", body.len());
                // No subscribers is not an error
                let _ = tx.send(Arc::new(body));
            }
            Err(ref e) if crate::network::is_disconnect(e) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

async fn feed_subscriber(
    socket: TcpStream,
    mut rx: broadcast::Receiver<Arc<Vec<u8>>>,
    shutdown: CancellationToken,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    let filter = tokio::select! {
        filter = read_frame(&mut reader) => filter?,
        _ = shutdown.cancelled() => return Ok(()),
    };
    tracing::debug!("Subscriber joined with filter {:?}", String::from_utf8_lossy(&filter));

    loop {
        let frame = tokio::select! {
            frame = rx.recv() => frame,
            _ = shutdown.cancelled() => return Ok(()),
        };

        match frame {
            Ok(body) => {
                if body.starts_with(&filter) {
                    write_frame(&mut writer, &body).await?;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Subscriber lagging, skipped {} frame(s)", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
