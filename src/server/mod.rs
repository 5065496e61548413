//! The read-only query server.
//!
//! Serves the monitor's persisted documents verbatim. Never triggers a fetch
//! and shares no in-memory state with the monitor loop; the atomic document
//! replace in `ledger` is the only cross-task synchronization.

use crate::config::Config;
use crate::ledger::{PROPOSER_DUTIES_FILE, SYNC_DUTIES_FILE, VALIDATOR_SNAPSHOT_FILE};
use log::info;
use serde_json::Value;
use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use warp::{reject, reply, Filter};

#[derive(Debug)]
pub enum Error {
    Warp(warp::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl warp::reject::Reject for Error {}

impl From<warp::Error> for Error {
    fn from(e: warp::Error) -> Self {
        Error::Warp(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A wrapper around the items required to spawn the HTTP server.
pub struct Context {
    pub config: Config,
}

pub async fn serve(config: Config, shutdown: oneshot::Receiver<()>) -> Result<(), Error> {
    let ctx = Context { config };

    let (_socket_addr, server) = start_server(Arc::new(ctx), async {
        let _ = shutdown.await;
    })?;

    server.await;

    Ok(())
}

/// Creates a server that will serve the persisted monitor state.
///
/// The server will shut down gracefully when the `shutdown` future resolves.
///
/// ## Returns
///
/// This function will bind the server to the provided address and then return
/// a tuple of:
///
/// - `SocketAddr`: the address that the HTTP server will listen on.
/// - `Future`: the actual server future that will need to be awaited.
///
/// ## Errors
///
/// Returns an error if the server is unable to bind.
pub fn start_server(
    ctx: Arc<Context>,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), Error> {
    let config = &ctx.config;

    let inner_ctx = ctx.clone();
    let ctx_filter = warp::any().map(move || inner_ctx.clone());

    let validators = warp::path("v1")
        .and(warp::path("validators"))
        .and(warp::path::end())
        .and(ctx_filter.clone())
        .and_then(|ctx: Arc<Context>| async move {
            match read_document(&ctx.config.data_dir, VALIDATOR_SNAPSHOT_FILE).await {
                Ok(document) => Ok(reply::json(&document)),
                Err(e) => Err(reject::custom(e)),
            }
        });

    let proposer_duties = warp::path("v1")
        .and(warp::path("duties"))
        .and(warp::path("proposer"))
        .and(warp::path::end())
        .and(ctx_filter.clone())
        .and_then(|ctx: Arc<Context>| async move {
            match read_document(&ctx.config.data_dir, PROPOSER_DUTIES_FILE).await {
                Ok(document) => Ok(reply::json(&document)),
                Err(e) => Err(reject::custom(e)),
            }
        });

    let sync_duties = warp::path("v1")
        .and(warp::path("duties"))
        .and(warp::path("sync"))
        .and(warp::path::end())
        .and(ctx_filter)
        .and_then(|ctx: Arc<Context>| async move {
            match read_document(&ctx.config.data_dir, SYNC_DUTIES_FILE).await {
                Ok(document) => Ok(reply::json(&document)),
                Err(e) => Err(reject::custom(e)),
            }
        });

    let routes = warp::get()
        .and(validators.or(proposer_duties).or(sync_duties))
        // Add a `Server` header.
        .map(|reply| warp::reply::with_header(reply, "Server", "duty_watch"));

    let (listening_socket, server) = warp::serve(routes).try_bind_with_graceful_shutdown(
        SocketAddrV4::new(config.server_listen_addr, config.server_listen_port),
        async {
            shutdown.await;
        },
    )?;

    info!("HTTP server listening on {}", listening_socket);

    Ok((listening_socket, server))
}

/// Reads a persisted JSON document, defaulting to an empty array when the
/// monitor has not written it yet.
async fn read_document(data_dir: &Path, name: &str) -> Result<Value, Error> {
    match tokio::fs::read(data_dir.join(name)).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Array(Vec::new())),
        Err(e) => Err(Error::Io(e)),
    }
}
