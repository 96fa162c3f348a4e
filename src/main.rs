//! gsnsync - a synchronous master-master replicated commit engine.

use std::path::PathBuf;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gsnsync::cluster::Topology;
use gsnsync::config::EngineConfig;
use gsnsync::coordinator::Coordinator;
use gsnsync::executor::{EchoExecutor, FileWal, Wal};
use gsnsync::peer::{self, LinkEvent};
use gsnsync::state::StateTracker;
use gsnsync::Result;

#[derive(Parser)]
#[command(name = "gsnsyncd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gsnsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,

    /// Validate the configuration file and exit
    Validate,

    /// Print this node's derived identity (host_id, peers) and exit
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)?;
    println!(
        "configuration is valid: {} hosts, local host_id={}",
        config.num_hosts(),
        config.local_id()
    );
    Ok(())
}

fn run_info(config_path: PathBuf) -> Result<()> {
    let config = EngineConfig::from_file(&config_path)?;
    let topology = Topology::from_config(&config);
    println!("host_id: {}", topology.local_id);
    println!("num_hosts: {}", topology.num_hosts());
    for host in topology.peers() {
        println!("  peer {} -> {}", host.host_id, host.address);
    }
    Ok(())
}

/// Start the node: bring up the WAL, derive the cluster topology, spawn a
/// link supervisor and the shared peer listener, then drive the
/// coordinator off link events and a couple of periodic ticks until
/// interrupted.
async fn run_start(config_path: PathBuf) -> Result<()> {
    tracing::info!("starting gsnsync node");

    let config = Arc::new(EngineConfig::from_file(&config_path)?);
    std::fs::create_dir_all(config.wal_dir())?;
    std::fs::create_dir_all(config.state_dir())?;

    let topology = Topology::from_config(&config);
    tracing::info!(
        host_id = topology.local_id,
        num_hosts = topology.num_hosts(),
        "topology resolved"
    );

    let wal: Arc<dyn Wal> = Arc::new(FileWal::open(config.wal_dir(), config.wal.clone()).await?);
    let executor = Arc::new(EchoExecutor::default());
    let state = Arc::new(StateTracker::new(config.state_dir())?);

    let initial_gsn = state.last_observed_gsn().await?.max(wal.durable_gsn());
    let running_crc = Arc::new(AtomicU32::new(0));
    let mut coordinator = Coordinator::new(
        config.clone(),
        topology.clone(),
        wal.clone(),
        executor,
        initial_gsn,
        running_crc.clone(),
    );

    let (events_tx, mut events_rx) = mpsc::channel::<LinkEvent>(1024);

    let mut accept_routes = std::collections::HashMap::new();
    for host in topology.peers() {
        let (accept_tx, accept_rx) = mpsc::channel(4);
        accept_routes.insert(host.host_id, accept_tx);

        let local_gsn_fn = {
            let wal = wal.clone();
            move || wal.durable_gsn()
        };
        let local_crc_fn = {
            let running_crc = running_crc.clone();
            move || running_crc.load(std::sync::atomic::Ordering::SeqCst)
        };

        let handle = peer::link::spawn(
            topology.local_id,
            host.host_id,
            host.address.clone(),
            config.clone(),
            local_gsn_fn,
            local_crc_fn,
            events_tx.clone(),
            Some(accept_rx),
        );
        coordinator.register_link(handle);
    }

    let bind_address = topology
        .get(topology.local_id)
        .map(|h| h.address.clone())
        .unwrap_or_else(|| "0.0.0.0:0".to_string());
    let read_timeout = config.read_timeout();
    tokio::spawn(async move {
        if let Err(e) = peer::listener::run(bind_address, read_timeout, accept_routes).await {
            tracing::error!(error = %e, "peer listener exited");
        }
    });

    // Give every peer a chance to link up before the first election runs.
    tokio::time::sleep(coordinator.election_grace_period()).await;

    let mut timeout_tick = tokio::time::interval(Duration::from_millis(250));
    let mut state_tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                if let Err(e) = coordinator.handle_link_event(event).await {
                    tracing::warn!(error = %e, "error handling link event");
                }
            }
            _ = timeout_tick.tick() => {
                if let Err(e) = coordinator.poll_timeouts().await {
                    tracing::warn!(error = %e, "error polling operation timeouts");
                }
            }
            _ = state_tick.tick() => {
                if let Err(e) = state.advance_gsn(wal.durable_gsn()).await {
                    tracing::warn!(error = %e, "failed to persist observed gsn");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
