//! `Agent_ready`, `Agent_reply`, and `ping` (§4.4)

use super::{content_length, product_id, request_id, RESPONSE_TYPE_HEADER};
use crate::error::RelayError;
use crate::registry::waiting::{AgentLeg1Outcome, ClientLeg1Outcome};
use crate::relay;
use crate::server::AppState;
use crate::stream;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// `POST /ping`: immediately finishes empty, used by clients to pick the closest server.
pub async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `POST /agent/...`: pairs with a waiting client if one exists, else parks
/// under `timeout_agent` and answers "no client" if nobody shows up.
///
/// # Errors
///
/// Returns a [`RelayError`] if the paired client's headers fail translation.
pub async fn agent_ready(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;

    while let Some((client_headers, notify)) = state.registry.pop_waiting_client(product) {
        let request_id = state.request_ids.next_id();
        let chunk_hint = relay::chunk_hint_for(content_length(&client_headers), &state.config.buffer_size);
        let (body_tx, body_rx) =
            stream::leg_channel(state.config.max_buffer_size.into_inner(), chunk_hint);

        state.registry.create_interaction(request_id, product);
        if notify
            .send(ClientLeg1Outcome::Paired { request_id, body_tx })
            .is_err()
        {
            state.registry.remove_interaction(request_id);
            continue;
        }

        let (response_headers, status) = relay::translate_headers(&client_headers, request_id)?;
        tracing::info!(%request_id, %product, "agent paired with a waiting client");
        return Ok((status, response_headers, stream::body_from_receiver(body_rx)).into_response());
    }

    let (id, rx) = state.registry.add_wait_agent(product);
    tokio::select! {
        result = rx => {
            match result {
                Ok(AgentLeg1Outcome::Paired { request_id, body_rx, response_headers, status }) => {
                    state.registry.create_interaction(request_id, product);
                    tracing::info!(%request_id, %product, "agent paired after waiting");
                    Ok((status, response_headers, stream::body_from_receiver(body_rx)).into_response())
                }
                Err(_) => Ok(no_client_response()),
            }
        }
        () = state.time.sleep(state.config.timeout_agent.as_duration()) => {
            state.registry.remove_wait_agent(product, id, std::time::Instant::now());
            tracing::info!(%product, "agent wait timed out with no client");
            Ok(no_client_response())
        }
    }
}

/// `POST /agentreply/...`: attaches the agent as the source of leg 2,
/// relaying its body into the still-open client response.
///
/// # Errors
///
/// Returns [`RelayError::NoInteraction`] if the `RequestId` names no
/// in-flight Interaction, [`RelayError::AlreadyReplying`] if a reply already
/// claimed it, and surfaces header-translation failures.
pub async fn agent_reply(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<Response, RelayError> {
    let product = product_id(&headers)?;
    let req_id = request_id(&headers)?;

    let interaction = state.registry.interaction(req_id).ok_or(RelayError::NoInteraction)?;
    if interaction.product != product {
        return Err(RelayError::ValidationError {
            request_id: req_id,
            expected: interaction.product,
        });
    }

    let (response_headers, status) = relay::translate_headers(&headers, req_id)?;
    let chunk_hint = relay::chunk_hint_for(content_length(&headers), &state.config.buffer_size);
    let (body_tx, body_rx) = stream::leg_channel(state.config.max_buffer_size.into_inner(), chunk_hint);

    if !interaction.claim_leg2(response_headers, status, body_rx) {
        return Err(RelayError::AlreadyReplying(req_id));
    }

    let forwarded = stream::forward_body(body, &body_tx).await;
    drop(body_tx);
    state.registry.remove_interaction(req_id);
    match &forwarded {
        Ok(bytes) => tracing::info!(request_id = %req_id, bytes, "agent reply relayed to client"),
        Err(error) => tracing::warn!(request_id = %req_id, %error, "agent reply stream closed early"),
    }

    forwarded.map(|_| StatusCode::OK.into_response())
}

fn no_client_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(RESPONSE_TYPE_HEADER, HeaderValue::from_static("0"));
    (StatusCode::OK, headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::InstanceDirectory;
    use crate::domain_types::RequestIdGenerator;
    use crate::registry::Registry;
    use crate::time_provider::test_time_provider;
    use axum::http::HeaderValue;

    async fn test_state() -> Arc<AppState> {
        let config = Config::development();
        Arc::new(AppState {
            directory: InstanceDirectory::new(config.clone()).await.unwrap(),
            registry: Registry::default(),
            request_ids: RequestIdGenerator::new(),
            time: test_time_provider(),
            config,
        })
    }

    #[tokio::test]
    async fn agent_ready_times_out_to_no_client_when_nobody_waits() {
        let state = test_state().await;
        let mut headers = HeaderMap::new();
        headers.insert(super::super::PRODUCT_ID_HEADER, HeaderValue::from_static("1"));
        let response = agent_ready(State(state), headers).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(RESPONSE_TYPE_HEADER).unwrap(), "0");
    }

    #[tokio::test]
    async fn agent_reply_without_interaction_is_bad_gateway() {
        let state = test_state().await;
        let mut headers = HeaderMap::new();
        headers.insert(super::super::PRODUCT_ID_HEADER, HeaderValue::from_static("1"));
        headers.insert(crate::relay::REQUEST_ID_HEADER, HeaderValue::from_static("99"));
        let result = agent_reply(State(state), headers, axum::body::Body::empty()).await;
        assert!(matches!(result, Err(RelayError::NoInteraction)));
    }
}
