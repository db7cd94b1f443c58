//! Coordination Protocol
//!
//! Defines the `{service, data}` envelope exchanged between nodes, the
//! directory and the admin tool, the codecs it travels in, and the
//! frame header used on TCP connections.

mod envelope;
pub mod codec;
mod frame;

pub use envelope::{Envelope, Payload, NodeEntry, Timestamp, local_timestamp};
pub use codec::{Codec, CodecChain, JsonCodec, MsgPackCodec};
pub use frame::FrameHeader;

/// Well-known service names
pub mod service {
    pub const RANK: &str = "rank";
    pub const LIST: &str = "list";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const CLOCK: &str = "clock";
    pub const ELECTION: &str = "election";
    pub const ERROR: &str = "error";

    // Application services served by node agents
    pub const LOGIN: &str = "login";
    pub const USERS: &str = "users";
    pub const CHANNEL: &str = "channel";
    pub const CHANNELS: &str = "channels";
    pub const PUBLISH: &str = "publish";
    pub const MESSAGE: &str = "message";
}
