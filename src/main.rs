use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, error};

use relayq::connection::ConnectionRegistry;
use relayq::queue::SequencedLog;
use relayq::server::{AppState, run_server};
use relayq::settings::AppConfig;
use relayq::trace;
use relayq::worker::{EchoExecutor, Worker};

#[derive(Parser, Debug)]
#[clap(version, about)]
/// Application CLI arguments
struct Args {
    /// whether to be verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// path to a TOML config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = AppConfig::load(args.config.as_deref())?;
    trace::init(cfg.log_format)?;
    if args.verbose {
        debug!(?args, ?cfg, "starting");
    }

    // One log, one registry, one worker — constructed here and passed down
    // explicitly, no globally reachable state.
    let log = Arc::new(SequencedLog::new());
    let registry = Arc::new(ConnectionRegistry::new(
        cfg.rate_limit.clone(),
        Duration::from_millis(cfg.connection.idle_timeout_ms),
    ));
    let state = AppState::new(Arc::clone(&log), registry);

    let executor = EchoExecutor::new(Duration::from_millis(cfg.worker.echo_delay_ms));
    let worker = Worker::new(log, executor, Duration::from_millis(cfg.worker.idle_sleep_ms));
    worker.start();

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        let _ = shutdown_tx.send(());
    });

    let addr: SocketAddr = cfg.server.bind_addr.parse()?;
    run_server(addr, state, shutdown_rx).await?;

    worker.stop();
    Ok(())
}
