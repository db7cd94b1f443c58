//! RollCtl - Command line tool for poking a rollcall cluster
//!
//! Usage:
//!   rollctl list                              - Show the directory
//!   rollctl poll-clock                        - Ask every node for its time
//!   rollctl election --all                    - Ask every node who coordinates
//!   rollctl set-clock --server s1 --time T    - Adjust one node's clock
//!   rollctl announce --coordinator s2         - Publish a coordinator

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use rollcall::agent::DirectoryClient;
use rollcall::clock::LogicalClock;
use rollcall::config::RollcallConfig;
use rollcall::coordination::Announcer;
use rollcall::directory::peer_address;
use rollcall::network::{PeerTransport, RpcClient};
use rollcall::protocol::{service, Envelope, NodeEntry, Payload};
use rollcall::pubsub::Publisher;

/// Rollcall Cluster Control Tool
#[derive(Parser)]
#[command(name = "rollctl")]
#[command(about = "Inspect and steer rollcall clusters", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "rollcall.toml")]
    config: PathBuf,

    /// Membership service address (overrides config)
    #[arg(short, long)]
    directory: Option<String>,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered servers
    List,
    /// Ask every listed server for its application time
    PollClock,
    /// Send an election request to one or all servers
    Election(Target),
    /// Set one server's application time
    SetClock {
        /// Server name
        #[arg(long)]
        server: String,
        /// New time, seconds since the epoch
        #[arg(long)]
        time: f64,
    },
    /// Publish a coordinator announcement on the servers topic
    Announce {
        /// Coordinator name
        #[arg(long)]
        coordinator: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Server name
    #[arg(long)]
    server: Option<String>,
    /// Every listed server
    #[arg(long)]
    all: bool,
}

/// Shared handles for one invocation
struct Ctl {
    config: RollcallConfig,
    directory: DirectoryClient,
    transport: Arc<dyn PeerTransport>,
    logical: Arc<LogicalClock>,
    limit: Duration,
}

impl Ctl {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = if cli.config.exists() {
            RollcallConfig::from_file(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?
        } else {
            RollcallConfig::default()
        };
        if let Some(address) = &cli.directory {
            config.directory.address = address.clone();
        }

        let limit = Duration::from_millis(cli.timeout_ms);
        let logical = Arc::new(LogicalClock::new());
        let transport: Arc<dyn PeerTransport> = Arc::new(RpcClient::new(limit));
        let directory = DirectoryClient::new(
            config.directory.address.clone(),
            Arc::clone(&transport),
            Arc::clone(&logical),
            limit,
        );

        Ok(Self {
            config,
            directory,
            transport,
            logical,
            limit,
        })
    }

    async fn list(&self) -> anyhow::Result<Vec<NodeEntry>> {
        self.directory
            .list()
            .await
            .with_context(|| format!("listing servers at {}", self.directory.address()))
    }

    async fn find(&self, name: &str) -> anyhow::Result<NodeEntry> {
        match self.list().await?.into_iter().find(|e| e.name == name) {
            Some(entry) => Ok(entry),
            None => bail!("server {} is not in the directory", name),
        }
    }

    fn address_of(&self, entry: &NodeEntry) -> anyhow::Result<String> {
        Ok(peer_address(entry, self.config.node.admin_base_port)?)
    }

    /// One admin request, clock-stamped
    async fn admin(&self, entry: &NodeEntry, data: Payload, svc: &str) -> anyhow::Result<Envelope> {
        let address = self.address_of(entry)?;
        let request = Envelope::new(svc, data)
            .stamped()
            .with_clock(self.logical.tick());

        let reply = self
            .transport
            .request(&address, request, self.limit)
            .await
            .with_context(|| format!("{} at {}", entry.name, address))?;
        self.logical.observe(reply.clock());

        Ok(reply.expect_service(svc)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ctl = Ctl::new(&cli)?;

    match &cli.command {
        Commands::List => list_servers(&ctl).await,
        Commands::PollClock => poll_clock(&ctl).await,
        Commands::Election(target) => election(&ctl, target).await,
        Commands::SetClock { server, time } => set_clock(&ctl, server, *time).await,
        Commands::Announce { coordinator } => announce(&ctl, coordinator).await,
    }
}

async fn list_servers(ctl: &Ctl) -> anyhow::Result<()> {
    let entries = ctl.list().await?;

    println!();
    println!("Rollcall Directory (rollctl v{})", env!("CARGO_PKG_VERSION"));
    println!("=================================");
    println!();

    if entries.is_empty() {
        println!("(no servers registered)");
        return Ok(());
    }

    println!("{:<6} {:<20} {:<25}", "RANK", "NAME", "ADMIN ADDRESS");
    println!("{}", "-".repeat(53));
    for entry in &entries {
        let address = ctl
            .address_of(entry)
            .unwrap_or_else(|_| "(out of range)".to_string());
        println!("{:<6} {:<20} {:<25}", entry.rank, entry.name, address);
    }
    println!();

    Ok(())
}

async fn poll_clock(ctl: &Ctl) -> anyhow::Result<()> {
    for entry in ctl.list().await? {
        match ctl.admin(&entry, Payload::default(), service::CLOCK).await {
            Ok(reply) => match reply.data.time {
                Some(time) => {
                    let formatted = chrono::DateTime::from_timestamp(time as i64, 0)
                        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                        .unwrap_or_default();
                    println!("{:<20} {:.3}  {}  (clock={})", entry.name, time, formatted, reply.clock().unwrap_or(0));
                }
                None => println!("{:<20} (no time reported)", entry.name),
            },
            Err(e) => println!("{:<20} \x1b[31munreachable\x1b[0m: {:#}", entry.name, e),
        }
    }
    Ok(())
}

async fn election(ctl: &Ctl, target: &Target) -> anyhow::Result<()> {
    let entries = match &target.server {
        Some(name) => vec![ctl.find(name).await?],
        None => ctl.list().await?,
    };

    for entry in entries {
        match ctl.admin(&entry, Payload::default(), service::ELECTION).await {
            Ok(reply) => println!(
                "{:<20} coordinator: {}",
                entry.name,
                reply.data.coordinator.as_deref().unwrap_or("(unknown)")
            ),
            Err(e) => println!("{:<20} \x1b[31munreachable\x1b[0m: {:#}", entry.name, e),
        }
    }
    Ok(())
}

async fn set_clock(ctl: &Ctl, server: &str, time: f64) -> anyhow::Result<()> {
    if !time.is_finite() {
        bail!("time must be a finite number of seconds");
    }

    let entry = ctl.find(server).await?;
    let data = Payload {
        time: Some(time),
        ..Default::default()
    };
    let reply = ctl.admin(&entry, data, service::CLOCK).await?;

    println!(
        "{} now reports {:.3}",
        entry.name,
        reply.data.time.unwrap_or(time)
    );
    Ok(())
}

async fn announce(ctl: &Ctl, coordinator: &str) -> anyhow::Result<()> {
    let publisher = Publisher::new(
        ctl.config.pubsub.publish_address.clone(),
        ctl.config.pubsub.topic.clone(),
        ctl.limit,
    );
    let announcement = Envelope::new(
        service::ELECTION,
        Payload {
            coordinator: Some(coordinator.to_string()),
            ..Default::default()
        },
    )
    .stamped()
    .with_clock(ctl.logical.tick());

    publisher
        .announce(&announcement)
        .await
        .with_context(|| format!("publishing to {}", ctl.config.pubsub.publish_address))?;

    println!("Announced {} as coordinator on '{}'", coordinator, ctl.config.pubsub.topic);
    Ok(())
}
