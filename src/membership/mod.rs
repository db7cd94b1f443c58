//! Membership Module
//!
//! The directory's network face and its expiry sweeper.

mod service;

pub use service::{spawn_sweeper, MembershipService};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RollcallConfig;
use crate::coordination::CoordinatorCell;
use crate::directory::DirectoryStore;
use crate::error::Result;
use crate::network::RpcServer;

/// Run the membership service until `shutdown` fires
pub async fn run(config: &RollcallConfig, shutdown: CancellationToken) -> Result<()> {
    let store = Arc::new(DirectoryStore::open(
        config.directory.storage_path.clone(),
        config.heartbeat_timeout(),
    ));
    let coordinator = Arc::new(CoordinatorCell::persistent(
        config.directory.coordinator_path.clone(),
    ));

    let sweeper = config
        .sweep_interval()
        .map(|every| spawn_sweeper(Arc::clone(&store), every, shutdown.clone()));

    let service = Arc::new(MembershipService::new(store, coordinator));
    let server = RpcServer::bind(
        "Membership service",
        &config.directory.bind_address,
        service,
        shutdown,
    )
    .await?;

    let result = server.serve().await;

    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            tracing::warn!("Sweeper ended abnormally: {}", e);
        }
    }

    result
}
