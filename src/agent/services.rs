//! Application Services
//!
//! Login, channel and messaging services over line-oriented text files.
//! Replies are returned unstamped; the endpoint applies the clock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::clock::LogicalClock;
use crate::error::{Error, Result};
use crate::protocol::{local_timestamp, service, Envelope, Payload};
use crate::pubsub::Publisher;

const LOGINS: &str = "logins.txt";
const CHANNELS: &str = "channels.txt";
const CHANNEL_HISTORY: &str = "historico_pubsub.txt";
const MESSAGE_HISTORY: &str = "historico_msg.txt";

const STATUS_OK: &str = "OK";
const STATUS_SUCCESS: &str = "sucesso";
const STATUS_LOGGED_IN: &str = "logado";
const STATUS_ERROR: &str = "erro";

/// Application-level request handling behind the node's main endpoint
#[async_trait]
pub trait ApplicationHandler: Send + Sync + 'static {
    /// Produce the reply for `request`; `UnknownService` for anything else
    async fn handle(&self, request: &Envelope) -> Result<Envelope>;
}

/// Flat-file implementation of the application services
pub struct FlatFileServices {
    /// Directory holding the text files
    data_dir: PathBuf,
    /// Channel and direct-message delivery
    publisher: Publisher,
    /// Stamped into published lines
    logical: Arc<LogicalClock>,
    /// Serializes read-then-append sequences
    files: Mutex<()>,
}

impl FlatFileServices {
    /// Create services storing their files under `data_dir`
    pub fn new(data_dir: PathBuf, publisher: Publisher, logical: Arc<LogicalClock>) -> Self {
        Self {
            data_dir,
            publisher,
            logical,
            files: Mutex::new(()),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    async fn login(&self, request: &Envelope) -> Envelope {
        let Some(user) = request.data.user.as_deref().filter(|u| !u.is_empty()) else {
            return reply_status(
                service::LOGIN,
                STATUS_ERROR,
                "Invalid login: 'user' is missing",
            );
        };
        let stamp = request
            .data
            .timestamp
            .clone()
            .unwrap_or_else(local_timestamp)
            .to_string();

        let _guard = self.files.lock().await;
        let known = read_first_column(&self.path(LOGINS)).await;

        let (status, description) = if known.iter().any(|u| u == user) {
            (STATUS_LOGGED_IN, format!("User '{}' is already logged in", user))
        } else {
            match append_line(&self.path(LOGINS), &format!("{},{}", user, stamp)).await {
                Ok(()) => {
                    tracing::info!("Login: {}", user);
                    (STATUS_SUCCESS, "Login recorded".to_string())
                }
                Err(e) => (STATUS_ERROR, format!("Failed to record login: {}", e)),
            }
        };

        let mut reply = reply_status(service::LOGIN, status, description);
        reply.data.user = Some(user.to_string());
        reply
    }

    async fn users(&self) -> Envelope {
        let users = read_first_column(&self.path(LOGINS)).await;
        Envelope::new(
            service::USERS,
            Payload {
                users: Some(users),
                ..Default::default()
            },
        )
    }

    async fn channel(&self, request: &Envelope) -> Envelope {
        let Some(channel) = request.data.channel.as_deref().filter(|c| !c.is_empty()) else {
            return reply_status(
                service::CHANNEL,
                STATUS_ERROR,
                "Invalid channel: 'channel' is missing",
            );
        };
        if channel.contains(char::is_whitespace) {
            return reply_status(
                service::CHANNEL,
                STATUS_ERROR,
                "Invalid channel: names cannot contain spaces",
            );
        }
        let stamp = request
            .data
            .timestamp
            .clone()
            .unwrap_or_else(local_timestamp)
            .to_string();

        let _guard = self.files.lock().await;
        let known = read_first_column(&self.path(CHANNELS)).await;
        if known.iter().any(|c| c == channel) {
            return reply_status(service::CHANNEL, STATUS_SUCCESS, "");
        }

        match append_line(&self.path(CHANNELS), &format!("{},{}", channel, stamp)).await {
            Ok(()) => {
                tracing::info!("Channel created: {}", channel);
                reply_status(service::CHANNEL, STATUS_SUCCESS, "")
            }
            Err(e) => reply_status(
                service::CHANNEL,
                STATUS_ERROR,
                format!("Failed to record channel: {}", e),
            ),
        }
    }

    async fn channels(&self) -> Envelope {
        let channels = read_first_column(&self.path(CHANNELS)).await;
        Envelope::new(
            service::CHANNELS,
            Payload {
                channels: Some(channels),
                ..Default::default()
            },
        )
    }

    async fn publish(&self, request: &Envelope) -> Envelope {
        let user = request.data.user.clone().unwrap_or_default();
        let message = request.data.message.clone().unwrap_or_default();
        let channel = request.data.channel.as_deref().unwrap_or_default();

        let known = read_first_column(&self.path(CHANNELS)).await;
        if channel.is_empty() || !known.iter().any(|c| c == channel) {
            return reply_message(service::PUBLISH, STATUS_ERROR, "Channel does not exist");
        }

        match self
            .deliver(channel, &user, &message, CHANNEL_HISTORY)
            .await
        {
            Ok(()) => reply_message(service::PUBLISH, STATUS_OK, ""),
            Err(e) => reply_message(
                service::PUBLISH,
                STATUS_ERROR,
                format!("Failed to publish: {}", e),
            ),
        }
    }

    async fn message(&self, request: &Envelope) -> Envelope {
        let src = request.data.src.clone().unwrap_or_default();
        let message = request.data.message.clone().unwrap_or_default();
        let dst = request.data.dst.as_deref().unwrap_or_default();

        let known = read_first_column(&self.path(LOGINS)).await;
        if dst.is_empty() || !known.iter().any(|u| u == dst) {
            return reply_message(
                service::MESSAGE,
                STATUS_ERROR,
                "Destination user does not exist",
            );
        }

        match self.deliver(dst, &src, &message, MESSAGE_HISTORY).await {
            Ok(()) => {
                tracing::info!("Message {} -> {}", src, dst);
                reply_message(service::MESSAGE, STATUS_OK, "")
            }
            Err(e) => reply_message(
                service::MESSAGE,
                STATUS_ERROR,
                format!("Failed to send message: {}", e),
            ),
        }
    }

    /// Publish `<topic> <from>: <text> [<time>] (clock=<n>)` and log it
    async fn deliver(&self, topic: &str, from: &str, text: &str, history: &str) -> Result<()> {
        let time = local_timestamp().to_string();
        let clock = self.logical.tick();

        let line = format!("{}: {} [{}] (clock={})", from, text, time, clock);
        self.publisher.publish(topic, &line).await?;

        let _guard = self.files.lock().await;
        let record = format!("{},{},{},{},{}", topic, from, text, time, clock);
        if let Err(e) = append_line(&self.path(history), &record).await {
            tracing::warn!("Failed to append to {}: {}", history, e);
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationHandler for FlatFileServices {
    async fn handle(&self, request: &Envelope) -> Result<Envelope> {
        let reply = match request.service.as_str() {
            service::LOGIN => self.login(request).await,
            service::USERS => self.users().await,
            service::CHANNEL => self.channel(request).await,
            service::CHANNELS => self.channels().await,
            service::PUBLISH => self.publish(request).await,
            service::MESSAGE => self.message(request).await,
            other => return Err(Error::UnknownService(other.to_string())),
        };
        Ok(reply)
    }
}

fn reply_status(service: &str, status: &str, description: impl Into<String>) -> Envelope {
    Envelope::new(
        service,
        Payload {
            status: Some(status.to_string()),
            description: Some(description.into()),
            ..Default::default()
        },
    )
}

fn reply_message(service: &str, status: &str, message: impl Into<String>) -> Envelope {
    Envelope::new(
        service,
        Payload {
            status: Some(status.to_string()),
            message: Some(message.into()),
            ..Default::default()
        },
    )
}

/// First comma-separated field of every non-empty line; missing file is empty
async fn read_first_column(path: &Path) -> Vec<String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    content
        .lines()
        .filter_map(|line| line.trim().split(',').next())
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::{PubSubHub, Subscriber};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    fn request(service: &str, data: Payload) -> Envelope {
        Envelope::new(service, data)
    }

    fn offline(dir: &Path) -> FlatFileServices {
        FlatFileServices::new(
            dir.to_path_buf(),
            Publisher::new("127.0.0.1:1", "servers", Duration::from_millis(200)),
            Arc::new(LogicalClock::new()),
        )
    }

    #[tokio::test]
    async fn test_login_flow() {
        let dir = tempdir().unwrap();
        let services = offline(dir.path());

        let login = request(
            "login",
            Payload {
                user: Some("alice".into()),
                ..Default::default()
            },
        );
        let reply = services.handle(&login).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("sucesso"));
        assert_eq!(reply.data.user.as_deref(), Some("alice"));

        let reply = services.handle(&login).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("logado"));

        let reply = services.handle(&request("login", Payload::default())).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("erro"));

        let reply = services.handle(&request("users", Payload::default())).await.unwrap();
        assert_eq!(reply.data.users, Some(vec!["alice".to_string()]));
    }

    #[tokio::test]
    async fn test_channels() {
        let dir = tempdir().unwrap();
        let services = offline(dir.path());

        let reply = services.handle(&request("channels", Payload::default())).await.unwrap();
        assert_eq!(reply.data.channels, Some(vec![]));

        for name in ["geral", "geral", "random"] {
            let create = request(
                "channel",
                Payload {
                    channel: Some(name.into()),
                    ..Default::default()
                },
            );
            let reply = services.handle(&create).await.unwrap();
            assert_eq!(reply.data.status.as_deref(), Some("sucesso"));
        }

        let reply = services.handle(&request("channels", Payload::default())).await.unwrap();
        assert_eq!(reply.data.channels, Some(vec!["geral".to_string(), "random".to_string()]));
    }

    #[tokio::test]
    async fn test_publish_requires_channel() {
        let dir = tempdir().unwrap();
        let services = offline(dir.path());

        let publish = request(
            "publish",
            Payload {
                user: Some("alice".into()),
                channel: Some("nowhere".into()),
                message: Some("hi".into()),
                ..Default::default()
            },
        );
        let reply = services.handle(&publish).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("erro"));
    }

    #[tokio::test]
    async fn test_unreachable_hub_is_error_status() {
        let dir = tempdir().unwrap();
        let services = offline(dir.path());
        append_line(&dir.path().join(LOGINS), "bob,12:00:00").await.unwrap();

        let message = request(
            "message",
            Payload {
                src: Some("alice".into()),
                dst: Some("bob".into()),
                message: Some("hi".into()),
                ..Default::default()
            },
        );
        let reply = services.handle(&message).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("erro"));
        assert!(!dir.path().join(MESSAGE_HISTORY).exists());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let dir = tempdir().unwrap();
        let services = offline(dir.path());
        let result = services.handle(&request("rank", Payload::default())).await;
        assert!(matches!(result, Err(Error::UnknownService(_))));
    }

    #[tokio::test]
    async fn test_direct_message_delivered_and_logged() {
        let shutdown = CancellationToken::new();
        let hub = PubSubHub::bind("127.0.0.1:0", "127.0.0.1:0", shutdown.clone())
            .await
            .unwrap();
        let (pub_addr, sub_addr) = hub.local_addrs().unwrap();
        tokio::spawn(hub.serve());

        let limit = Duration::from_secs(1);
        let mut inbox = Subscriber::connect(&sub_addr.to_string(), "bob", limit).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let dir = tempdir().unwrap();
        let services = FlatFileServices::new(
            dir.path().to_path_buf(),
            Publisher::new(pub_addr.to_string(), "servers", limit),
            Arc::new(LogicalClock::new()),
        );
        append_line(&dir.path().join(LOGINS), "bob,12:00:00").await.unwrap();

        let message = request(
            "message",
            Payload {
                src: Some("alice".into()),
                dst: Some("bob".into()),
                message: Some("hello".into()),
                ..Default::default()
            },
        );
        let reply = services.handle(&message).await.unwrap();
        assert_eq!(reply.data.status.as_deref(), Some("OK"));

        let frame = tokio::time::timeout(limit, inbox.next_frame()).await.unwrap().unwrap().unwrap();
        assert!(frame.starts_with("bob alice: hello ["));
        assert!(frame.ends_with("(clock=1)"));

        let history = std::fs::read_to_string(dir.path().join(MESSAGE_HISTORY)).unwrap();
        assert!(history.starts_with("bob,alice,hello,"));

        shutdown.cancel();
    }
}
