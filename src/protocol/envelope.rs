//! Message Envelope
//!
//! Every request and reply is `{service, data}`. The data map is a flat
//! bag of optional fields; which ones matter depends on the service.

use serde::{Deserialize, Deserializer, Serialize};

use super::service;
use crate::error::{Error, Result};

/// Wall-clock time in the process-local timezone, as carried in `timestamp`
pub fn local_timestamp() -> Timestamp {
    Timestamp::Text(chrono::Local::now().format("%H:%M:%S").to_string())
}

/// Sender timestamp: peers send either a formatted string or epoch seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(f64),
    Text(String),
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timestamp::Unix(t) => write!(f, "{:.3}", t),
            Timestamp::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Simplified directory entry returned by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub rank: u32,
    #[serde(default)]
    pub address: Option<String>,
}

/// Service-specific fields of an envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    // Membership
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, alias = "addr", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<NodeEntry>>,

    // Coordination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election: Option<String>,

    // Status and errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // Application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,

    // Stamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, deserialize_with = "lenient_clock", skip_serializing_if = "Option::is_none")]
    pub clock: Option<u64>,
}

/// Accept any numeric clock; anything else counts as absent
fn lenient_clock<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawClock {
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<RawClock>::deserialize(deserializer)? {
        Some(RawClock::Unsigned(v)) => Some(v),
        Some(RawClock::Signed(v)) => u64::try_from(v).ok(),
        Some(RawClock::Float(v)) if v.is_finite() && v >= 0.0 => Some(v as u64),
        _ => None,
    })
}

/// A tagged request or reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub service: String,
    #[serde(default)]
    pub data: Payload,
}

impl Envelope {
    /// Build an envelope for `service` with the given data
    pub fn new(service: impl Into<String>, data: Payload) -> Self {
        Self {
            service: service.into(),
            data,
        }
    }

    /// Build an envelope with empty data
    pub fn bare(service: impl Into<String>) -> Self {
        Self::new(service, Payload::default())
    }

    /// Build an `error` reply carrying a human-readable message
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            service::ERROR,
            Payload {
                status: Some("erro".to_string()),
                message: Some(message.into()),
                ..Default::default()
            },
        )
    }

    /// Set the `clock` field
    pub fn with_clock(mut self, clock: u64) -> Self {
        self.data.clock = Some(clock);
        self
    }

    /// Set `timestamp` to the local wall clock
    pub fn stamped(mut self) -> Self {
        self.data.timestamp = Some(local_timestamp());
        self
    }

    /// Clock value carried by this envelope, if numeric
    pub fn clock(&self) -> Option<u64> {
        self.data.clock
    }

    /// Whether this is an `error` reply
    pub fn is_error(&self) -> bool {
        self.service == service::ERROR
    }

    /// Turn an `error` reply into `Err`, pass anything else through
    pub fn into_result(self) -> Result<Self> {
        if self.is_error() {
            let message = self
                .data
                .message
                .unwrap_or_else(|| "unspecified error".to_string());
            Err(Error::Remote(message))
        } else {
            Ok(self)
        }
    }

    /// Require a reply for `expected`, mapping `error` replies to `Err`
    pub fn expect_service(self, expected: &str) -> Result<Self> {
        let reply = self.into_result()?;
        if reply.service != expected {
            return Err(Error::UnexpectedReply {
                expected: expected.to_string(),
                got: reply.service,
            });
        }
        Ok(reply)
    }

    /// `data.user`, or a MissingField error naming this service
    pub fn require_user(&self) -> Result<&str> {
        match self.data.user.as_deref() {
            Some(user) if !user.is_empty() => Ok(user),
            _ => Err(Error::MissingField {
                service: self.service.clone(),
                field: "user",
            }),
        }
    }
}
