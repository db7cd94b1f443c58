//! Pub/Sub Module
//!
//! Topic-prefixed text frames: `"<topic> <payload>"`.

mod hub;
mod publisher;
mod subscriber;

pub use hub::PubSubHub;
pub use publisher::Publisher;
pub use subscriber::Subscriber;

use crate::config::RollcallConfig;
use crate::error::Result;
use tokio_util::sync::CancellationToken;

/// Split a frame into its topic and payload
pub fn split_topic(frame: &str) -> (&str, &str) {
    match frame.split_once(' ') {
        Some((topic, payload)) => (topic, payload),
        None => (frame, ""),
    }
}

/// Run the hub until `shutdown` fires
pub async fn run_hub(config: &RollcallConfig, shutdown: CancellationToken) -> Result<()> {
    let hub = PubSubHub::bind(
        &config.pubsub.publish_bind,
        &config.pubsub.subscribe_bind,
        shutdown,
    )
    .await?;
    hub.serve().await
}
