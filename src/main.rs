//! vibemesh - clustered publish/subscribe event router
//!
//! Usage:
//!   vibemesh [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   -n, --node-id <ID>      Node identifier (default: hostname)
//!   -b, --bind <ADDR>       Router endpoint bind address (default: 0.0.0.0:7947)
//!   -s, --seed <ADDR>       Gossip seed, repeatable (enables gossip membership)
//!   --subscribe <TOPIC>     Log every event on a topic, repeatable
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use vibemesh::config::{Config, MembershipMode};
use vibemesh::{Listener, Node, Subscription};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Option<Self> {
        LogLevel::from_str(level, true).ok()
    }
}

/// vibemesh - clustered publish/subscribe event router
#[derive(Parser, Debug)]
#[command(name = "vibemesh")]
#[command(version)]
#[command(about = "Clustered publish/subscribe event router")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node identifier
    #[arg(short, long)]
    node_id: Option<String>,

    /// Router endpoint bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Gossip seed node ("host:port"); switches to gossip membership
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Topic to subscribe to and log events from
    #[arg(long = "subscribe")]
    subscribe: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Logs every event on a topic
struct LoggingListener;

impl Listener<String> for LoggingListener {
    fn on_open(&self, subscription: &Subscription<String>) {
        info!("[{}] subscribed", subscription.topic().name());
    }

    fn on_event(&self, subscription: &Subscription<String>, event: String) {
        info!("[{}] {}", subscription.topic().name(), event);
    }

    fn on_close(&self, subscription: &Subscription<String>) {
        info!("[{}] subscription closed", subscription.topic().name());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides.
    // Validated after CLI overrides are applied.
    let loaded = match &args.config {
        Some(config_path) => Config::read(config_path),
        None => Config::read(""),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI arguments override config file
    if let Some(node_id) = args.node_id {
        config.cluster.node_id = Some(node_id);
    }
    if let Some(bind) = args.bind {
        config.router.bind = bind;
    }
    if !args.seeds.is_empty() {
        config.cluster.mode = MembershipMode::Gossip;
        config.cluster.seeds = args.seeds;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_level = args
        .log_level
        .or_else(|| LogLevel::from_config(&config.log.level))
        .unwrap_or_default();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting vibemesh");
    info!("  Node: {}", config.cluster.get_node_id());
    info!(
        "  Router endpoint: {} (path: {})",
        config.router.bind, config.router.path
    );
    match config.cluster.mode {
        MembershipMode::Static => {
            info!("  Membership: static ({} members)", config.cluster.members.len());
        }
        MembershipMode::Gossip => {
            info!("  Membership: gossip (gossip={})", config.cluster.gossip_addr);
            if !config.cluster.seeds.is_empty() {
                info!("    Seeds: {}", config.cluster.seeds.join(", "));
            }
        }
    }

    let node = Node::start(&config).await?;

    let listener = Arc::new(LoggingListener);
    let subscriptions: Vec<Subscription<String>> = args
        .subscribe
        .iter()
        .map(|topic| {
            info!("  Subscribing to '{}'", topic);
            node.router().topic::<String>(topic.as_str()).subscribe(listener.clone())
        })
        .collect();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    for subscription in &subscriptions {
        subscription.cancel();
    }
    node.shutdown().await;

    Ok(())
}
