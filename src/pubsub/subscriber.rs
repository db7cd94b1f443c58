//! Subscriber
//!
//! Long-lived connection to the hub's subscriber port.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::network::{is_disconnect, read_frame, write_frame};

/// A filtered stream of frames from the hub
pub struct Subscriber {
    stream: TcpStream,
    filter: String,
}

impl Subscriber {
    /// Connect to the hub and register `filter`
    pub async fn connect(address: &str, filter: &str, connect_timeout: Duration) -> Result<Self> {
        let mut stream = match timeout(connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::ConnectionFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(Error::ConnectionTimeout(address.to_string())),
        };

        write_frame(&mut stream, filter.as_bytes()).await?;
        tracing::debug!("Subscribed to {:?} at {}", filter, address);

        Ok(Self {
            stream,
            filter: filter.to_string(),
        })
    }

    /// Next matching frame as text; `None` once the hub hangs up
    pub async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            let body = match read_frame(&mut self.stream).await {
                Ok(body) => body,
                Err(ref e) if is_disconnect(e) => return Ok(None),
                Err(e) => return Err(e),
            };

            let text = String::from_utf8_lossy(&body).into_owned();
            // The hub already filters; re-check in case it is not ours
            if text.starts_with(&self.filter) {
                return Ok(Some(text));
            }
        }
    }
}
