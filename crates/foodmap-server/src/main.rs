//! Foodmap Optimization Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use foodmap_core::DEFAULT_MIN_BUDGET;
use foodmap_server::config::{
    parse_env_pair, DEFAULT_AGENT_STEP_DELAY_MS, DEFAULT_BIND_ADDR, DEFAULT_KEEPALIVE_SECS,
    DEFAULT_POLL_SCRIPT, DEFAULT_STREAM_SCRIPT, DEFAULT_WORKER_PROGRAM,
};
use foodmap_server::{http, AppState, Config};

/// Foodmap optimization server.
#[derive(Parser, Debug)]
#[command(name = "foodmap-server", about = "Food bank location optimization server")]
struct Args {
    /// HTTP server address
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    bind_addr: String,

    /// Interpreter used to run worker scripts
    #[arg(long, default_value = DEFAULT_WORKER_PROGRAM)]
    worker_program: String,

    /// Worker script for poll-mode jobs
    #[arg(long, default_value = DEFAULT_POLL_SCRIPT)]
    poll_script: PathBuf,

    /// Worker script for streamed jobs
    #[arg(long, default_value = DEFAULT_STREAM_SCRIPT)]
    stream_script: PathBuf,

    /// Extra worker environment variable (KEY=VALUE, repeatable)
    #[arg(long = "worker-env", value_parser = parse_env_pair)]
    worker_env: Vec<(String, String)>,

    /// Do not pass --min-distance to workers (for scripts without that flag)
    #[arg(long = "no-min-distance", action = ArgAction::SetFalse)]
    forward_min_distance: bool,

    /// Smallest accepted budget
    #[arg(long, default_value_t = DEFAULT_MIN_BUDGET)]
    min_budget: f64,

    /// Delay applied to each agent_step event, in milliseconds
    #[arg(long, default_value_t = DEFAULT_AGENT_STEP_DELAY_MS)]
    agent_step_delay_ms: u64,

    /// Interval between stream keepalives, in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_KEEPALIVE_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    keepalive_secs: u64,

    /// Relay this upstream event stream instead of spawning workers
    #[arg(long)]
    upstream_url: Option<String>,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            worker_program: args.worker_program,
            poll_script: args.poll_script,
            stream_script: args.stream_script,
            worker_env: args.worker_env,
            forward_min_distance: args.forward_min_distance,
            min_budget: args.min_budget,
            agent_step_delay: Duration::from_millis(args.agent_step_delay_ms),
            keepalive_interval: Duration::from_secs(args.keepalive_secs),
            upstream_url: args.upstream_url,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("foodmap=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load config
    let config = Config::from(Args::parse());
    let http_addr: SocketAddr = config.bind_addr.parse()?;

    info!(
        http_addr = %http_addr,
        worker = %config.worker_program,
        poll_script = %config.poll_script.display(),
        stream_script = %config.stream_script.display(),
        min_budget = config.min_budget,
        upstream = ?config.upstream_url,
        "Starting Foodmap server"
    );

    // Create shared state
    let state = AppState::new(config)?;

    // Create HTTP router
    let router = http::create_router(state);

    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
