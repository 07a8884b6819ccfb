//! HTTP server wiring: `AppState`, the route table, and listener lifecycle (§4.4, §4.5)
//!
//! Mirrors the teacher's `create_router`/`start_server`/`serve` split, but
//! with every route bound to the shared [`AppState`] instead of a stateless
//! health check, and graceful shutdown driven by `tokio::signal::ctrl_c`
//! rather than a `tokio_util::sync::CancellationToken` — this crate has no
//! use for an externally-triggerable cancellation source beyond the process
//! signal itself.

use crate::config::Config;
use crate::directory::InstanceDirectory;
use crate::domain_types::RequestIdGenerator;
use crate::handlers::{agent, client, directory};
use crate::registry::Registry;
use crate::time_provider::SharedTimeProvider;
use axum::Router;
use axum::routing::post;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::timeout::TimeoutLayer;

/// Everything a handler needs to answer a request: the wait/interaction
/// tables, the peer directory, a process-wide `RequestId` generator, the
/// time abstraction every timeout race sleeps against, and this instance's
/// own configuration.
pub struct AppState {
    /// Runtime configuration this instance was started with.
    pub config: Config,
    /// Waiting queues, Interaction table, agent cache, and location map.
    pub registry: Registry,
    /// Peer gossip, range carving, and the location-lookup cascade.
    pub directory: InstanceDirectory,
    /// Process-wide monotone `RequestId` generator.
    pub request_ids: RequestIdGenerator,
    /// Time abstraction every `tokio::select!` timeout race sleeps against.
    pub time: SharedTimeProvider,
}

/// Builds the full route table described in §4.4 and §4.5, wired to `state`.
///
/// A generous [`TimeoutLayer`] backstops every route against a connection
/// that never makes progress; it is well above every configured wait
/// (`timeout_agent`, `timeout_client`, `timeout_no_reply`), which already
/// bound the parking phases on their own.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", post(agent::ping))
        .route("/agent/{*rest}", post(agent::agent_ready))
        .route("/agentreply/{*rest}", post(agent::agent_reply))
        .route("/client", post(directory::client_cluster))
        .route("/client/{*rest}", post(client::client_instance))
        .route("/hello", post(directory::hello))
        .route("/hello/{port}", post(directory::hello_port))
        .route("/connected", post(directory::connected))
        .route("/connected/{port}", post(directory::connected_port))
        .route("/find", post(directory::find))
        .route("/find/{*rest}", post(directory::find))
        .route("/range", post(directory::range))
        .route("/range/{port}", post(directory::range_port))
        .route("/connect", post(directory::connect))
        .route("/getuniversalid", post(directory::get_universal_id))
        .layer(TimeoutLayer::new(Duration::from_secs(300)))
        .with_state(state)
}

/// Binds a `TcpListener` for `config.host:config.port`.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn start_server(config: &Config) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port.into_inner())).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves `router` on `listener` until the process exits.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

/// Serves `router` on `listener`, shutting down gracefully on `SIGINT`.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve_with_graceful_shutdown(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
