//! Cluster-internal gossip, range delegation, and location endpoints (§4.5)
//!
//! Unlike [`super::agent`] and [`super::client`], these handlers answer calls
//! placed by *other* relay instances rather than Desktop/Mobile App clients.
//! `InstanceDirectory` already knows how to drive each of these protocols as
//! the caller (`bootstrap`, `find_desktop`, `announce_connect`, ...); these
//! handlers are simply the other end of those same calls.

use super::product_id;
use crate::domain_types::{InstanceAddr, InstancePort, ServerName};
use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

const HOST_HEADER: &str = "x-iwp-host";
const PORT_HEADER: &str = "x-iwp-port";
const HOSTS_HEADER: &str = "x-iwp-hosts";
const PORTS_HEADER: &str = "x-iwp-ports";
const RANGE_SIZE_HEADER: &str = "x-iwp-range-size";
const RANGE_FROM_HEADER: &str = "x-iwp-range-from";
const RANGE_TO_HEADER: &str = "x-iwp-range-to";

fn text_header(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn caller_addr(headers: &HeaderMap) -> Option<InstanceAddr> {
    let host = headers.get(HOST_HEADER)?.to_str().ok()?;
    let server = ServerName::try_new(host.to_string()).ok()?;
    let port = headers
        .get(PORT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(InstancePort::parse)?;
    Some(InstanceAddr::new(server, port))
}

fn redirect(addr: InstanceAddr) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(HOST_HEADER, text_header(addr.server.to_string()));
    headers.insert(PORT_HEADER, text_header(addr.port.to_string()));
    (StatusCode::OK, headers).into_response()
}

fn no_agent() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(super::RESPONSE_TYPE_HEADER, HeaderValue::from_static("0"));
    (StatusCode::OK, headers).into_response()
}

/// `POST /client`: the cluster-level redirect. Answers directly from
/// [`crate::registry::location::LocationMap`] if this instance already knows
/// who owns the ProductID, otherwise cascades through [`crate::directory::InstanceDirectory::find_desktop`].
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-IWP-ProductUnivId` is missing.
pub async fn client_cluster(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;
    if let Some(addr) = state.registry.location().get(product) {
        return Ok(redirect(addr));
    }
    match state.directory.find_desktop(&state.registry, product).await {
        Some(addr) => Ok(redirect(addr)),
        None => Ok(no_agent()),
    }
}

/// `POST /hello`: gossip from another server. Learns the caller and, if it
/// was previously unknown, propagates the discovery to every sibling port on
/// this host so the whole server learns regardless of which port a
/// round-robin load balancer sends future hellos to. Answers with every peer
/// server this instance currently knows.
pub async fn hello(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(caller) = caller_addr(&headers) {
        let newly_learned = state
            .directory
            .peers()
            .learn_server(caller.server.clone(), caller.port);
        if newly_learned {
            let own_host = state.directory.config().server.clone();
            for port in state.directory.peers().known_sibling_ports() {
                let sibling = InstanceAddr::new(own_host.clone(), port);
                let _ = state
                    .directory
                    .call(
                        sibling,
                        "/hello",
                        &[
                            (HOST_HEADER, caller.server.to_string()),
                            (PORT_HEADER, caller.port.to_string()),
                        ],
                    )
                    .await;
            }
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(HOSTS_HEADER, text_header(state.directory.peers().hosts_header_value()));
    (StatusCode::OK, headers).into_response()
}

/// `POST /hello/<port>`: gossip from a sibling port on this same host.
/// Learns the caller's port and answers with every sibling port known.
pub async fn hello_port(
    State(state): State<Arc<AppState>>,
    Path(_port): Path<u16>,
    headers: HeaderMap,
) -> Response {
    if let Some(port) = headers
        .get(PORT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(InstancePort::parse)
    {
        state.directory.peers().learn_sibling_port(port);
    }

    let mut headers = HeaderMap::new();
    headers.insert(PORTS_HEADER, text_header(state.directory.peers().ports_header_value()));
    (StatusCode::OK, headers).into_response()
}

async fn record_ownership(state: &AppState, headers: &HeaderMap) -> Result<(), RelayError> {
    let product = product_id(headers)?;
    if let Some(addr) = caller_addr(headers) {
        state.registry.location().record(product, addr);
    }
    Ok(())
}

/// `POST /connected`: another server announcing it owns a ProductID.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-IWP-ProductUnivId` is missing.
pub async fn connected(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, RelayError> {
    record_ownership(&state, &headers).await?;
    Ok(StatusCode::OK)
}

/// `POST /connected/<port>`: a sibling port announcing it owns a ProductID.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-IWP-ProductUnivId` is missing.
pub async fn connected_port(
    State(state): State<Arc<AppState>>,
    Path(_port): Path<u16>,
    headers: HeaderMap,
) -> Result<StatusCode, RelayError> {
    record_ownership(&state, &headers).await?;
    Ok(StatusCode::OK)
}

/// `POST /find`: answers who (if anyone known) owns a ProductID.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-IWP-ProductUnivId` is missing.
pub async fn find(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;
    match state.registry.location().get(product) {
        Some(addr) => Ok(redirect(addr)),
        None => Ok(StatusCode::OK.into_response()),
    }
}

async fn carve_response(state: &AppState, headers: &HeaderMap) -> Result<Response, RelayError> {
    let requested_size = headers
        .get(RANGE_SIZE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok());
    let carved = state.directory.carve_or_delegate(requested_size).await?;
    Ok(range_response(carved))
}

fn range_response(carved: Option<(u64, u64)>) -> Response {
    let Some((from, to)) = carved else {
        return StatusCode::OK.into_response();
    };
    let mut headers = HeaderMap::new();
    headers.insert(RANGE_FROM_HEADER, text_header(from.to_string()));
    headers.insert(RANGE_TO_HEADER, text_header(to.to_string()));
    (StatusCode::OK, headers).into_response()
}

/// `POST /range`: carves a sub-range out of the master range if this
/// instance is the master, otherwise forwards the request on to the master.
///
/// # Errors
///
/// Returns [`RelayError::RangeFileError`] if a range file can't be rewritten.
pub async fn range(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, RelayError> {
    carve_response(&state, &headers).await
}

/// `POST /range/<port>`: identical to [`range`], addressed at a specific sibling port.
///
/// # Errors
///
/// Returns [`RelayError::RangeFileError`] if a range file can't be rewritten.
pub async fn range_port(
    State(state): State<Arc<AppState>>,
    Path(_port): Path<u16>,
    headers: HeaderMap,
) -> Result<Response, RelayError> {
    carve_response(&state, &headers).await
}

/// `POST /connect`: an agent on this instance announcing it now owns a
/// ProductID. Records local ownership and fans the announcement out to every
/// known peer (`/connected`) and sibling port (`/connected/<port>`).
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-IWP-ProductUnivId` is missing.
pub async fn connect(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;
    state.registry.location().record(product, state.directory.own_addr());
    state.directory.announce_connect(product).await;

    let mut headers = HeaderMap::new();
    headers.insert(PORT_HEADER, text_header(state.directory.own_addr().port.to_string()));
    Ok((StatusCode::OK, headers).into_response())
}

/// `POST /getuniversalid`: carves a single fresh `CustomerId` out of this
/// instance's own range.
///
/// # Errors
///
/// Returns [`RelayError::RangeFileError`] if the range file can't be rewritten.
pub async fn get_universal_id(State(state): State<Arc<AppState>>) -> Result<Response, RelayError> {
    let Some(id) = state.directory.issue_customer_id().await? else {
        return Ok(StatusCode::OK.into_response());
    };
    let mut headers = HeaderMap::new();
    headers.insert(super::PRODUCT_ID_HEADER, text_header(id.to_string()));
    Ok((StatusCode::OK, headers).into_response())
}
