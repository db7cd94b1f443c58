//! Envelope Codecs
//!
//! MessagePack is the primary encoding; JSON is accepted for
//! interoperability with clients that cannot speak MessagePack. Decoding
//! walks an ordered list of codecs and takes the first that succeeds.

use super::Envelope;
use crate::error::{Error, Result};

/// A serialization format for envelopes
pub trait Codec: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Encode an envelope to bytes
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    /// Decode an envelope from bytes
    fn decode(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// MessagePack with named map fields
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// UTF-8 JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Ordered list of codecs tried in sequence
pub struct CodecChain {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecChain {
    /// Build a chain from explicit codecs (first is preferred for encoding)
    pub fn new(codecs: Vec<Box<dyn Codec>>) -> Self {
        Self { codecs }
    }

    /// MessagePack first, JSON fallback
    pub fn standard() -> Self {
        Self::new(vec![Box::new(MsgPackCodec), Box::new(JsonCodec)])
    }

    /// Encode with the first codec that accepts the envelope
    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let mut last_err = None;
        for codec in &self.codecs {
            match codec.encode(envelope) {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::debug!("{} encode failed: {}", codec.name(), e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Internal("codec chain is empty".into())))
    }

    /// Decode with the first codec that understands the bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let mut failures = Vec::with_capacity(self.codecs.len());
        for codec in &self.codecs {
            match codec.decode(bytes) {
                Ok(envelope) => {
                    tracing::trace!("Decoded {} envelope with {}", envelope.service, codec.name());
                    return Ok(envelope);
                }
                Err(e) => failures.push(format!("{}: {}", codec.name(), e)),
            }
        }
        Err(Error::InvalidPayload(failures.join("; ")))
    }
}

impl Default for CodecChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NodeEntry, Payload};

    fn sample() -> Envelope {
        Envelope::new(
            "list",
            Payload {
                list: Some(vec![NodeEntry {
                    name: "servidor1".into(),
                    rank: 1,
                    address: Some("servidor1:5601".into()),
                }]),
                ..Default::default()
            },
        )
        .with_clock(7)
    }

    #[test]
    fn test_chain_prefers_msgpack() {
        let chain = CodecChain::standard();
        let bytes = chain.encode(&sample()).unwrap();
        // MessagePack fixmap marker, not a JSON '{'
        assert_ne!(bytes[0], b'{');
        assert_eq!(MsgPackCodec.decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_chain_falls_back_to_json() {
        let chain = CodecChain::standard();
        let raw = br#"{"service":"heartbeat","data":{"user":"servidor2","clock":3}}"#;
        let env = chain.decode(raw).unwrap();
        assert_eq!(env.service, "heartbeat");
        assert_eq!(env.data.user.as_deref(), Some("servidor2"));
        assert_eq!(env.clock(), Some(3));
    }

    #[test]
    fn test_chain_reports_all_failures() {
        let chain = CodecChain::standard();
        let err = chain.decode(b"not an envelope").unwrap_err();
        match err {
            Error::InvalidPayload(msg) => {
                assert!(msg.contains("msgpack"));
                assert!(msg.contains("json"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_msgpack_map_is_readable_by_name() {
        // Clients written against plain maps must see named keys
        let bytes = MsgPackCodec.encode(&Envelope::bare("list")).unwrap();
        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["service"], "list");
    }
}
