//! `Client` (§4.4): the mobile-facing rendezvous loop

use super::{content_length, product_id, RESPONSE_TYPE_HEADER};
use crate::domain_types::{CustomerId, InstanceAddr, RequestId};
use crate::error::RelayError;
use crate::registry::interaction::ClientLeg2Outcome;
use crate::registry::waiting::{AgentLeg1Outcome, ClientLeg1Outcome};
use crate::relay;
use crate::server::AppState;
use crate::stream;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::mpsc;

/// `POST /client/...`: the per-instance rendezvous loop described in §4.4.
///
/// # Errors
///
/// Returns a [`RelayError`] if header translation fails or either leg's
/// stream closes unexpectedly.
pub async fn client_instance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;
    let self_addr = state.directory.own_addr();

    // Step 1: claim an already-waiting agent, building the outcome ourselves
    // since we (the client) hold the source headers it needs translated.
    if let Some((request_id, body_tx)) = try_pair_with_agent(&state, product, &headers).await? {
        return pump_and_await_reply(&state, request_id, body_tx, body).await;
    }

    // Steps 2-4: local park-and-retry, remote redirect, or give up.
    loop {
        let owner = state.registry.location().get(product);
        let owns_locally = owner.as_ref().is_none_or(|addr| *addr == self_addr);
        let has_cache_entry = state.registry.cache().is_fresh(
            product,
            std::time::Instant::now(),
            state.config.timeout_cache.as_duration(),
        );

        if owns_locally && has_cache_entry {
            let (id, rx) = state.registry.add_wait_client(product, headers.clone());
            tokio::select! {
                result = rx => {
                    match result {
                        Ok(ClientLeg1Outcome::Paired { request_id, body_tx }) => {
                            return pump_and_await_reply(&state, request_id, body_tx, body).await;
                        }
                        Err(_) => return Ok(no_agent_response()),
                    }
                }
                () = state.time.sleep(state.config.timeout_client.as_duration()) => {
                    state.registry.remove_wait_client(product, id);
                    continue;
                }
            }
        }

        if owner.is_some_and(|addr| addr != self_addr) {
            if let Some(found) = state.directory.find_desktop(&state.registry, product).await {
                tracing::info!(%product, host = %found.server, port = %found.port, "redirecting client to owning instance");
                return Ok(redirect_response(found));
            }
        }

        tracing::info!(%product, "client found no agent");
        return Ok(no_agent_response());
    }
}

/// Tries to pop an already-waiting agent. On success returns the
/// [`RequestId`] and the sender this call should now pump its own request
/// body into; the Interaction is already created.
async fn try_pair_with_agent(
    state: &AppState,
    product: CustomerId,
    headers: &HeaderMap,
) -> Result<Option<(RequestId, mpsc::Sender<Bytes>)>, RelayError> {
    let request_id = state.request_ids.next_id();
    let (response_headers, status) = relay::translate_headers(headers, request_id)?;
    let chunk_hint = relay::chunk_hint_for(content_length(headers), &state.config.buffer_size);
    let (body_tx, body_rx) = stream::leg_channel(state.config.max_buffer_size.into_inner(), chunk_hint);

    let outcome = AgentLeg1Outcome::Paired {
        request_id,
        body_rx,
        response_headers,
        status,
    };
    match state
        .registry
        .pop_waiting_agent(product, outcome, std::time::Instant::now())
    {
        None => {
            state.registry.create_interaction(request_id, product);
            Ok(Some((request_id, body_tx)))
        }
        Some(_undelivered) => Ok(None),
    }
}

/// Leg 1 forward (this call's own body into the paired agent) followed by
/// leg 2 wait (the agent's eventual `agentreply`, under `timeout_no_reply`).
async fn pump_and_await_reply(
    state: &AppState,
    request_id: RequestId,
    body_tx: mpsc::Sender<Bytes>,
    body: axum::body::Body,
) -> Result<Response, RelayError> {
    let forward_result = stream::forward_body(body, &body_tx).await;
    drop(body_tx);
    if let Err(error) = forward_result {
        state.registry.remove_interaction(request_id);
        return Err(error);
    }

    let Some(interaction) = state.registry.interaction(request_id) else {
        return Err(RelayError::NoInteraction);
    };
    let rx = interaction.arm_leg2();

    tokio::select! {
        result = rx => {
            state.registry.remove_interaction(request_id);
            match result {
                Ok(ClientLeg2Outcome::Paired { response_headers, status, body_rx }) => {
                    Ok((status, response_headers, stream::body_from_receiver(body_rx)).into_response())
                }
                Err(_) => Ok(no_reply_response()),
            }
        }
        () = state.time.sleep(state.config.timeout_no_reply.as_duration()) => {
            state.registry.remove_interaction(request_id);
            tracing::info!(%request_id, "no agentreply within timeout_no_reply, recycling");
            Ok(no_reply_response())
        }
    }
}

fn no_agent_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(RESPONSE_TYPE_HEADER, HeaderValue::from_static("0"));
    (StatusCode::OK, headers).into_response()
}

fn no_reply_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("x-iwp-isrecycle", HeaderValue::from_static("1"));
    (StatusCode::GATEWAY_TIMEOUT, headers).into_response()
}

fn redirect_response(addr: InstanceAddr) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-iwp-host",
        HeaderValue::from_str(&addr.server.to_string()).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(
        "x-iwp-port",
        HeaderValue::from_str(&addr.port.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    (StatusCode::OK, headers).into_response()
}
