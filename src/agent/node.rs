//! Node Agent
//!
//! Per-server glue: obtains a rank, serves the admin and application
//! endpoints, heartbeats, follows election announcements and drives the
//! coordination worker. Everything stops on the shared cancellation
//! token.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AdminHandler, ApplicationEndpoint, ApplicationHandler, DirectoryClient, FlatFileServices};
use crate::clock::{AppClock, LogicalClock};
use crate::config::RollcallConfig;
use crate::coordination::{
    task_queue, ClockSynchronizer, Coordination, CoordinationTask, CoordinatorCell,
    ElectionEngine, MemberSource, TaskQueue, TaskWorker,
};
use crate::directory::admin_port;
use crate::error::{Error, Result};
use crate::network::{PeerTransport, RpcClient, RpcServer};
use crate::protocol::{service, Envelope};
use crate::pubsub::{split_topic, Publisher, Subscriber};

/// Longest wait between reconnection attempts
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// One cluster node
pub struct NodeAgent {
    config: RollcallConfig,
    logical: Arc<LogicalClock>,
    app_clock: Arc<AppClock>,
    coordinator: Arc<CoordinatorCell>,
    directory: Arc<DirectoryClient>,
    transport: Arc<dyn PeerTransport>,
    publisher: Publisher,
}

impl NodeAgent {
    /// Create an agent from configuration
    pub fn new(config: RollcallConfig) -> Self {
        let logical = Arc::new(LogicalClock::new());
        let transport: Arc<dyn PeerTransport> = Arc::new(RpcClient::new(config.request_timeout()));
        let directory = Arc::new(DirectoryClient::new(
            config.directory.address.clone(),
            Arc::clone(&transport),
            Arc::clone(&logical),
            config.request_timeout(),
        ));
        let publisher = Publisher::new(
            config.pubsub.publish_address.clone(),
            config.pubsub.topic.clone(),
            config.request_timeout(),
        );

        Self {
            config,
            logical,
            app_clock: Arc::new(AppClock::new()),
            coordinator: Arc::new(CoordinatorCell::new()),
            directory,
            transport,
            publisher,
        }
    }

    /// This node's name
    pub fn name(&self) -> &str {
        &self.config.node.name
    }

    /// Logical clock shared by every loop
    pub fn logical_clock(&self) -> &Arc<LogicalClock> {
        &self.logical
    }

    /// Local coordinator view
    pub fn coordinator(&self) -> &Arc<CoordinatorCell> {
        &self.coordinator
    }

    /// Ask the directory for a rank, retrying until it answers
    pub async fn obtain_rank(&self, shutdown: &CancellationToken) -> Result<u32> {
        let mut backoff = Duration::from_millis(500);

        loop {
            match self.directory.rank(self.name(), None).await {
                Ok(rank) => return Ok(rank),
                Err(e) => {
                    tracing::warn!(
                        "Rank request to {} failed: {}; retrying in {:?}",
                        self.directory.address(),
                        e,
                        backoff
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.cancelled() => return Err(Error::ShuttingDown),
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Run the node until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let rank = self.obtain_rank(&shutdown).await?;
        let admin_address = self.config.admin_address(rank)?;
        let admin_bind = format!("0.0.0.0:{}", admin_port(self.config.node.admin_base_port, rank)?);

        tracing::info!(
            "Node {} has rank {}, admin address {}",
            self.name(),
            rank,
            admin_address
        );

        let members: Arc<dyn MemberSource> = Arc::clone(&self.directory) as Arc<dyn MemberSource>;
        let (queue, worker) = self.coordination(members);

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Admin endpoint
        let admin = AdminHandler::new(
            Arc::clone(&self.app_clock),
            Arc::clone(&self.logical),
            Arc::clone(&self.coordinator),
        );
        let admin_server = RpcServer::bind("Admin endpoint", &admin_bind, Arc::new(admin), shutdown.clone()).await?;
        tasks.push(spawn_server(admin_server));

        // Application endpoint
        let services: Arc<dyn ApplicationHandler> = Arc::new(FlatFileServices::new(
            self.config.node.data_dir.clone(),
            self.publisher.clone(),
            Arc::clone(&self.logical),
        ));
        let endpoint = ApplicationEndpoint::new(
            services,
            Arc::clone(&self.logical),
            queue.clone(),
            self.config.cluster.sync_every_messages,
        );
        let main_server = RpcServer::bind(
            "Application endpoint",
            &self.config.node.bind_address,
            Arc::new(endpoint),
            shutdown.clone(),
        )
        .await?;
        tasks.push(spawn_server(main_server));

        // Background loops
        tasks.push(tokio::spawn(heartbeat_loop(
            Arc::clone(&self.directory),
            self.name().to_string(),
            admin_address,
            self.config.heartbeat_interval(),
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(announcement_loop(
            self.config.pubsub.subscribe_address.clone(),
            self.config.pubsub.topic.clone(),
            self.config.request_timeout(),
            Arc::clone(&self.logical),
            Arc::clone(&self.coordinator),
            shutdown.clone(),
        )));
        if let Some(every) = self.config.sync_interval() {
            tasks.push(tokio::spawn(sync_timer(queue.clone(), every, shutdown.clone())));
        }
        tasks.push(tokio::spawn(worker.run(shutdown.clone())));

        // Find out who coordinates as soon as possible
        let _ = queue.submit(CoordinationTask::MaybeSync);

        shutdown.cancelled().await;
        tracing::info!("Node {} shutting down", self.name());

        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Node task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Build the coordination queue and worker for this node
    fn coordination(&self, members: Arc<dyn MemberSource>) -> (TaskQueue, TaskWorker) {
        let election = ElectionEngine::new(
            Arc::clone(&members),
            Arc::clone(&self.coordinator),
            Arc::new(self.publisher.clone()),
            Arc::clone(&self.logical),
        );
        let synchronizer = ClockSynchronizer::new(
            self.name().to_string(),
            Arc::clone(&members),
            Arc::clone(&self.transport),
            Arc::clone(&self.app_clock),
            Arc::clone(&self.logical),
            self.config.node.admin_base_port,
            self.config.peer_timeout(),
        );
        let executor = Coordination::new(
            self.name().to_string(),
            Arc::clone(&self.coordinator),
            members,
            election,
            synchronizer,
        );

        task_queue(self.config.cluster.task_queue_depth, Arc::new(executor))
    }
}

fn spawn_server(server: RpcServer) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = server.serve().await {
            tracing::error!("Server failed: {}", e);
        }
    })
}

/// Report liveness (with our admin address) every `every`
async fn heartbeat_loop(
    directory: Arc<DirectoryClient>,
    name: String,
    admin_address: String,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = directory.heartbeat(&name, Some(&admin_address)).await {
                    tracing::warn!("Heartbeat failed: {}", e);
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Periodically ask the worker to consider a sync round
async fn sync_timer(queue: TaskQueue, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; startup already submitted one
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = queue.submit(CoordinationTask::MaybeSync);
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Follow coordinator announcements, reconnecting to the hub as needed
async fn announcement_loop(
    hub: String,
    topic: String,
    connect_timeout: Duration,
    logical: Arc<LogicalClock>,
    coordinator: Arc<CoordinatorCell>,
    shutdown: CancellationToken,
) {
    let mut backoff = Duration::from_millis(500);

    loop {
        let session = async {
            let mut subscriber = Subscriber::connect(&hub, &topic, connect_timeout).await?;
            while let Some(frame) = subscriber.next_frame().await? {
                apply_announcement(&frame, &topic, &logical, &coordinator).await;
            }
            Ok::<_, Error>(())
        };

        let outcome = tokio::select! {
            outcome = session => outcome,
            _ = shutdown.cancelled() => return,
        };

        match outcome {
            Ok(()) => {
                tracing::info!("Hub {} closed the subscription", hub);
                backoff = Duration::from_millis(500);
            }
            Err(e) => tracing::warn!("Subscription to {} failed: {}; retrying in {:?}", hub, e, backoff),
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Adopt the coordinator named by one announcement frame
///
/// Frames for other topics and payloads that do not parse are ignored.
pub async fn apply_announcement(
    frame: &str,
    topic: &str,
    logical: &LogicalClock,
    coordinator: &CoordinatorCell,
) -> Option<String> {
    let (frame_topic, payload) = split_topic(frame);
    if frame_topic != topic {
        return None;
    }

    let announcement: Envelope = match serde_json::from_str(payload) {
        Ok(announcement) => announcement,
        Err(e) => {
            tracing::debug!("Ignoring malformed announcement: {}", e);
            return None;
        }
    };
    logical.observe(announcement.clock());

    if announcement.service != service::ELECTION {
        return None;
    }
    let name = announcement.data.coordinator.filter(|c| !c.is_empty())?;
    coordinator.set(name.clone()).await;
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryStore;
    use crate::membership::MembershipService;
    use crate::pubsub::PubSubHub;
    use std::future::Future;
    use std::net::SocketAddr;
    use tempfile::TempDir;

    /// Poll `check` every 50 ms until it holds or `limit` passes
    async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check().await
    }

    /// Directory and hub on loopback
    struct Infra {
        store: Arc<DirectoryStore>,
        directory: SocketAddr,
        publish: SocketAddr,
        subscribe: SocketAddr,
    }

    async fn start_infra(expiry: Duration, shutdown: &CancellationToken) -> Infra {
        let store = Arc::new(DirectoryStore::in_memory(expiry));
        let membership = MembershipService::new(Arc::clone(&store), Arc::new(CoordinatorCell::new()));
        let server = RpcServer::bind("directory", "127.0.0.1:0", Arc::new(membership), shutdown.clone())
            .await
            .unwrap();
        let directory = server.local_addr().unwrap();
        tokio::spawn(server.serve());

        let hub = PubSubHub::bind("127.0.0.1:0", "127.0.0.1:0", shutdown.clone())
            .await
            .unwrap();
        let (publish, subscribe) = hub.local_addrs().unwrap();
        tokio::spawn(hub.serve());

        Infra {
            store,
            directory,
            publish,
            subscribe,
        }
    }

    fn node_config(name: &str, infra: &Infra, admin_base_port: u16, data_dir: &TempDir) -> RollcallConfig {
        let mut config = RollcallConfig::default();
        config.node.name = name.to_string();
        config.node.bind_address = "127.0.0.1:0".into();
        config.node.admin_host = Some("127.0.0.1".into());
        config.node.admin_base_port = admin_base_port;
        config.node.data_dir = data_dir.path().join(name);
        config.directory.address = infra.directory.to_string();
        config.pubsub.publish_address = infra.publish.to_string();
        config.pubsub.subscribe_address = infra.subscribe.to_string();
        config.cluster.heartbeat_interval_ms = 100;
        config.cluster.request_timeout_ms = 500;
        config.cluster.peer_timeout_ms = 300;
        config.cluster.sync_interval_ms = 200;
        config
    }

    #[tokio::test]
    async fn test_cluster_converges_and_fails_over() {
        let infra_shutdown = CancellationToken::new();
        let infra = start_infra(Duration::from_millis(800), &infra_shutdown).await;
        let data_dir = tempfile::tempdir().unwrap();
        let base = 29_100;

        // Fix the ranks up front so every startup election sees all three
        for name in ["n1", "n2", "n3"] {
            infra.store.rank(name, None).await;
        }

        let mut views = Vec::new();
        let mut tokens = Vec::new();
        for name in ["n1", "n2", "n3"] {
            let agent = NodeAgent::new(node_config(name, &infra, base, &data_dir));
            let token = CancellationToken::new();
            views.push(Arc::clone(agent.coordinator()));
            tokens.push(token.clone());
            tokio::spawn(agent.run(token));
        }

        let converged = eventually(Duration::from_secs(5), || {
            let views = views.clone();
            async move {
                for view in &views {
                    if view.get().await.as_deref() != Some("n3") {
                        return false;
                    }
                }
                true
            }
        })
        .await;
        assert!(converged, "nodes did not agree on n3");

        // Heartbeats carry the derived admin address
        let store = Arc::clone(&infra.store);
        let registered = eventually(Duration::from_secs(2), || {
            let store = Arc::clone(&store);
            async move {
                store.get("n2").await.and_then(|r| r.address).as_deref() == Some("127.0.0.1:29102")
            }
        })
        .await;
        assert!(registered);

        // Coordinator goes silent; survivors elect the next highest rank
        tokens[2].cancel();
        let failed_over = eventually(Duration::from_secs(6), || {
            let views = views[..2].to_vec();
            async move {
                for view in &views {
                    if view.get().await.as_deref() != Some("n2") {
                        return false;
                    }
                }
                true
            }
        })
        .await;
        assert!(failed_over, "survivors did not move to n2");
        assert!(infra.store.get("n3").await.is_none());

        for token in &tokens {
            token.cancel();
        }
        infra_shutdown.cancel();
    }

    #[tokio::test]
    async fn test_obtain_rank_stops_on_shutdown() {
        // Nothing listens on a freshly released port
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut config = RollcallConfig::default();
        config.node.name = "n1".into();
        config.directory.address = unused.to_string();
        config.cluster.request_timeout_ms = 100;

        let agent = NodeAgent::new(config);
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), agent.obtain_rank(&shutdown))
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_announcements_follow_late_hub() {
        let shutdown = CancellationToken::new();
        let logical = Arc::new(LogicalClock::new());
        let cell = Arc::new(CoordinatorCell::new());

        // Reserve two ports, release them, and start following before the hub exists
        let reserved = [
            std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
            std::net::TcpListener::bind("127.0.0.1:0").unwrap(),
        ];
        let publish = reserved[0].local_addr().unwrap();
        let subscribe = reserved[1].local_addr().unwrap();
        drop(reserved);
        tokio::spawn(announcement_loop(
            subscribe.to_string(),
            "servers".into(),
            Duration::from_millis(200),
            Arc::clone(&logical),
            Arc::clone(&cell),
            shutdown.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let hub = PubSubHub::bind(&publish.to_string(), &subscribe.to_string(), shutdown.clone())
            .await
            .unwrap();
        tokio::spawn(hub.serve());

        let publisher = Publisher::new(publish.to_string(), "servers", Duration::from_millis(500));
        let announcement = Envelope::new(
            service::ELECTION,
            crate::protocol::Payload {
                coordinator: Some("servidor2".into()),
                ..Default::default()
            },
        )
        .with_clock(40);

        // Keep announcing until the reconnected subscriber hears one
        let heard = eventually(Duration::from_secs(10), || {
            let publisher = publisher.clone();
            let announcement = announcement.clone();
            let cell = Arc::clone(&cell);
            async move {
                let _ = publisher.publish_envelope("servers", &announcement).await;
                cell.get().await.as_deref() == Some("servidor2")
            }
        })
        .await;
        assert!(heard);
        assert!(logical.current() >= 40);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_announcement_updates_view() {
        let logical = LogicalClock::new();
        let cell = CoordinatorCell::new();

        let frame = r#"servers {"service":"election","data":{"coordinator":"servidor3","timestamp":"10:00:00","clock":12}}"#;
        let adopted = apply_announcement(frame, "servers", &logical, &cell).await;
        assert_eq!(adopted.as_deref(), Some("servidor3"));
        assert_eq!(cell.get().await.as_deref(), Some("servidor3"));
        assert_eq!(logical.current(), 12);

        // Last write wins, even if it regresses
        let frame = r#"servers {"service":"election","data":{"coordinator":"servidor1"}}"#;
        apply_announcement(frame, "servers", &logical, &cell).await;
        assert_eq!(cell.get().await.as_deref(), Some("servidor1"));
    }

    #[tokio::test]
    async fn test_ignores_foreign_and_malformed_frames() {
        let logical = LogicalClock::new();
        let cell = CoordinatorCell::new();

        for frame in [
            r#"serversX {"service":"election","data":{"coordinator":"a"}}"#,
            "servers not-json",
            "servers",
            r#"servers {"service":"election","data":{}}"#,
            r#"servers {"service":"heartbeat","data":{"coordinator":"a"}}"#,
        ] {
            assert_eq!(apply_announcement(frame, "servers", &logical, &cell).await, None);
        }
        assert_eq!(cell.get().await, None);
    }
}
