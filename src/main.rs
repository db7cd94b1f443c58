//! Rollcall - Cluster Membership and Coordination
//!
//! Runs the membership service, a cluster node or the pub/sub hub, plus a
//! few offline maintenance commands.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::agent::NodeAgent;
use rollcall::config::RollcallConfig;
use rollcall::directory::DirectoryStore;
use rollcall::error::{Error, Result};
use rollcall::{membership, pubsub};

/// Rollcall - Cluster Membership and Coordination
#[derive(Parser)]
#[command(name = "rollcall")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, default_value = "rollcall.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the membership (directory) service
    Directory,

    /// Run a cluster node
    Node {
        /// Node name (overrides the config)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run the pub/sub hub
    Hub,

    /// Generate a configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "rollcall.toml")]
        output: PathBuf,

        /// Node name
        #[arg(short, long, default_value = "servidor1")]
        name: String,
    },

    /// Validate configuration
    Validate,

    /// Sweep expired records from the directory file
    Sweep,

    /// Show one directory record
    Show {
        /// Node name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.as_deref();

    match cli.command {
        Commands::Init { output, name } => run_init(output, name),
        Commands::Validate => run_validate(cli.config),
        Commands::Directory => run_directory(setup(&cli.config, level)?).await,
        Commands::Node { name } => {
            let mut config = setup(&cli.config, level)?;
            if let Some(name) = name {
                config.node.name = name;
            }
            run_node(config).await
        }
        Commands::Hub => run_hub(setup(&cli.config, level)?).await,
        Commands::Sweep => run_sweep(setup(&cli.config, level)?).await,
        Commands::Show { name } => run_show(setup(&cli.config, level)?, name).await,
    }
}

/// Load configuration and start logging
fn setup(config_path: &Path, cli_level: Option<&str>) -> Result<RollcallConfig> {
    let config = load_config(config_path)?;
    init_logging(cli_level, &config);
    Ok(config)
}

/// Initialize logging
///
/// `RUST_LOG` wins over `--log-level`, which wins over the config.
fn init_logging(cli_level: Option<&str>, config: &RollcallConfig) {
    let level = cli_level.unwrap_or(&config.logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, or defaults when there is none
fn load_config(path: &Path) -> Result<RollcallConfig> {
    if path.exists() {
        RollcallConfig::from_file(path)
    } else {
        let config = RollcallConfig::default();
        config.validate()?;
        Ok(config)
    }
}

/// Cancel `shutdown` on Ctrl+C
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            shutdown.cancel();
        }
    });
}

/// Run the membership service
async fn run_directory(config: RollcallConfig) -> Result<()> {
    tracing::info!("Starting membership service on {}", config.directory.bind_address);
    tracing::info!(
        "Directory file: {}, expiry after {:?}",
        config.directory.storage_path.display(),
        config.heartbeat_timeout()
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    membership::run(&config, shutdown).await
}

/// Run a cluster node
async fn run_node(config: RollcallConfig) -> Result<()> {
    tracing::info!("Starting node {}", config.node.name);
    tracing::info!("Directory: {}", config.directory.address);
    tracing::info!("Application endpoint: {}", config.node.bind_address);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    match NodeAgent::new(config).run(shutdown).await {
        Err(Error::ShuttingDown) => Ok(()),
        other => other,
    }
}

/// Run the pub/sub hub
async fn run_hub(config: RollcallConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    pubsub::run_hub(&config, shutdown).await
}

/// Sweep the directory file once
///
/// Meant for a stopped directory; a running one sweeps on every `list`.
async fn run_sweep(config: RollcallConfig) -> Result<()> {
    let store = DirectoryStore::open(config.directory.storage_path.clone(), config.heartbeat_timeout());
    let removed = store.cleanup().await;

    println!("Removed {} expired record(s)", removed);
    for entry in store.list().await {
        println!("  {:>3}  {}", entry.rank, entry.name);
    }
    Ok(())
}

/// Print one directory record
async fn run_show(config: RollcallConfig, name: String) -> Result<()> {
    let store = DirectoryStore::open(config.directory.storage_path.clone(), config.heartbeat_timeout());
    let record = store
        .get(&name)
        .await
        .ok_or_else(|| Error::NodeNotFound(name.clone()))?;

    let age = rollcall::clock::unix_now() - record.last_seen;
    println!("Name:       {}", record.name);
    println!("Rank:       {}", record.rank);
    println!("Address:    {}", record.address.as_deref().unwrap_or("(none)"));
    println!("Last seen:  {:.1}s ago", age);
    println!(
        "Status:     {}",
        if age > config.heartbeat_timeout().as_secs_f64() { "expired" } else { "live" }
    );
    Ok(())
}

/// Write a configuration template
fn run_init(output: PathBuf, name: String) -> Result<()> {
    let config_content = format!(r#"# Rollcall Configuration
# Generated configuration file

[node]
name = "{name}"
bind_address = "0.0.0.0:5556"
# admin_host = "{name}"
admin_base_port = 5600
data_dir = "/var/lib/rollcall/{name}"

[directory]
address = "reference:5560"
bind_address = "0.0.0.0:5560"
storage_path = "/var/lib/rollcall/servers.json"
coordinator_path = "/var/lib/rollcall/coordinator.json"
heartbeat_timeout_ms = 30000
sweep_interval_ms = 10000

[cluster]
heartbeat_interval_ms = 5000
request_timeout_ms = 3000
peer_timeout_ms = 2000
sync_interval_ms = 30000
sync_every_messages = 10
task_queue_depth = 16

[pubsub]
publish_address = "proxy_pubsub:5557"
subscribe_address = "proxy_pubsub:5558"
topic = "servers"
publish_bind = "0.0.0.0:5557"
subscribe_bind = "0.0.0.0:5558"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point nodes at your directory and hub.");
    println!("Then start with: rollcall --config {} node", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match RollcallConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node:             {}", config.node.name);
            println!("  Endpoint:         {}", config.node.bind_address);
            println!("  Admin base port:  {}", config.node.admin_base_port);
            println!("  Directory:        {}", config.directory.address);
            println!("  Expiry:           {} ms", config.directory.heartbeat_timeout_ms);
            println!("  Heartbeat:        {} ms", config.cluster.heartbeat_interval_ms);
            println!("  Hub:              {} / {}", config.pubsub.publish_address, config.pubsub.subscribe_address);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
