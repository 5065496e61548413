//! A long-running validator duty monitor.
//!
//! Tracks a fixed set of validator public keys against a beacon node,
//! records detected proposer and sync-committee duties exactly once in
//! append-only ledgers, and serves the accumulated state over a read-only
//! HTTP API. The monitor loop and the query server are independent tasks
//! sharing only the persisted documents on disk.

pub mod chain_clock;
pub mod cli;
pub mod client;
pub mod config;
pub mod ledger;
pub mod logger;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod types;

use crate::chain_clock::SystemTimeChainClock;
use crate::client::{BeaconNodeHttpClient, Timeouts, DEFAULT_TIMEOUT};
use crate::config::Config;
use crate::ledger::{DutyLedger, VALIDATOR_SNAPSHOT_FILE};
use crate::monitor::DutyMonitor;
use crate::registry::ValidatorRegistry;
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use url::Url;

/// Bounded grace period for the query server to drain in-flight requests at
/// shutdown.
const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum Error {
    Config(String),
    InvalidBeaconUrl(url::ParseError),
    Io(std::io::Error),
    Registry(registry::Error),
    Monitor(monitor::Error),
    Server(server::Error),
    ServerStopped,
    TaskFailure(String),
}

impl From<registry::Error> for Error {
    fn from(e: registry::Error) -> Self {
        Error::Registry(e)
    }
}

impl From<monitor::Error> for Error {
    fn from(e: monitor::Error) -> Self {
        Error::Monitor(e)
    }
}

impl From<server::Error> for Error {
    fn from(e: server::Error) -> Self {
        Error::Server(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub async fn run() -> Result<(), Error> {
    let matches = cli::app().get_matches();

    let mut config = match matches.value_of(cli::CONFIG) {
        Some(path) => Config::load_from_file(path.to_string()).map_err(Error::Config)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(&matches).map_err(Error::Config)?;

    logger::init_logger(&config.log_level);

    info!("Beacon node: {}", config.beacon_node_url);
    info!("Pubkeys file: {}", config.pubkeys_file.display());
    info!("Data directory: {}", config.data_dir.display());

    let server_url = Url::parse(&config.beacon_node_url).map_err(Error::InvalidBeaconUrl)?;
    let beacon = BeaconNodeHttpClient::new(server_url, Timeouts::set_all(DEFAULT_TIMEOUT));

    let watched = registry::load_watched_keys(&config.pubkeys_file)?;
    info!("Watching {} validator keys", watched.len());

    std::fs::create_dir_all(&config.data_dir).map_err(Error::Io)?;

    // Nothing can be scheduled before the node is synced and the chain
    // constants are known.
    monitor::wait_until_synced(&beacon).await;
    let chain_time = monitor::fetch_chain_time(&beacon).await?;
    let clock = SystemTimeChainClock::new(chain_time);

    let mut registry =
        ValidatorRegistry::new(watched, config.data_dir.join(VALIDATOR_SNAPSHOT_FILE));
    registry.refresh(&beacon).await?;

    let (monitor_shutdown_tx, monitor_shutdown_rx) = oneshot::channel();
    let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel();

    let mut server_handle = tokio::spawn(server::serve(config.clone(), server_shutdown_rx));

    let ledger = DutyLedger::new(config.data_dir.clone());
    let monitor = DutyMonitor::new(beacon, clock, registry, ledger);
    let mut monitor_handle = tokio::spawn(monitor.run(monitor_shutdown_rx));

    let mut server_finished = false;
    let result = tokio::select! {
        signal = shutdown_signal() => match signal {
            Ok(name) => {
                info!("Received {}; shutting down", name);
                let _ = monitor_shutdown_tx.send(());
                join_monitor(&mut monitor_handle).await
            }
            Err(e) => {
                error!("Unable to listen for shutdown signals: {}", e);
                let _ = monitor_shutdown_tx.send(());
                let _ = join_monitor(&mut monitor_handle).await;
                Err(Error::Io(e))
            }
        },
        result = &mut monitor_handle => join_result(result),
        result = &mut server_handle => {
            server_finished = true;
            let _ = monitor_shutdown_tx.send(());
            let _ = join_monitor(&mut monitor_handle).await;
            match result {
                Ok(Ok(())) => Err(Error::ServerStopped),
                Ok(Err(e)) => Err(Error::Server(e)),
                Err(e) => Err(Error::TaskFailure(e.to_string())),
            }
        }
    };

    if !server_finished {
        let _ = server_shutdown_tx.send(());
        match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, &mut server_handle).await {
            Ok(Ok(Ok(()))) => debug!("HTTP server stopped"),
            Ok(Ok(Err(e))) => error!("HTTP server error during shutdown: {}", e),
            Ok(Err(e)) => error!("HTTP server task failed: {}", e),
            Err(_) => {
                warn!(
                    "HTTP server did not stop within {:?}; aborting it",
                    SERVER_SHUTDOWN_GRACE
                );
                server_handle.abort();
            }
        }
    }

    result
}

async fn shutdown_signal() -> Result<&'static str, std::io::Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

async fn join_monitor(handle: &mut JoinHandle<Result<(), monitor::Error>>) -> Result<(), Error> {
    join_result(handle.await)
}

fn join_result(result: Result<Result<(), monitor::Error>, JoinError>) -> Result<(), Error> {
    match result {
        Ok(result) => result.map_err(Error::Monitor),
        Err(e) => Err(Error::TaskFailure(e.to_string())),
    }
}
