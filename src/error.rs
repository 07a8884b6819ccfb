//! Error taxonomy for the relay fabric
//!
//! One variant per row of the error taxonomy: `MalformedRequest`,
//! `StreamClosedError`, `StreamClosedWarning`, `RangeFileError`, `PeerError`,
//! `ValidationError`, `Internal`.

use crate::domain_types::{CustomerId, RequestId};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised anywhere in the core relay path.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or garbled HTTP framing; the connection is closed silently.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The peer dropped mid-stream; the paired handler must be torn down with 503.
    #[error("stream closed: {0}")]
    StreamClosedError(String),

    /// A write landed on an already-closed stream; handled identically to
    /// [`RelayError::StreamClosedError`].
    #[error("write to closed stream: {0}")]
    StreamClosedWarning(String),

    /// The persistent range file is unreadable, unwritable, or corrupt.
    #[error("range file error: {0}")]
    RangeFileError(#[source] std::io::Error),

    /// Outbound HTTP to a peer instance failed; the peer is evicted, not surfaced further.
    #[error("peer error contacting {peer}: {source}")]
    PeerError {
        /// The peer instance coordinate that failed to respond.
        peer: String,
        /// The underlying transport failure.
        #[source]
        source: reqwest::Error,
    },

    /// `RequestId`'s stored `CustomerId` doesn't match the caller's claim.
    #[error("request {request_id} does not belong to product {expected}")]
    ValidationError {
        /// The `RequestId` that failed validation.
        request_id: RequestId,
        /// The `CustomerId` the caller expected to own it.
        expected: CustomerId,
    },

    /// No Interaction (or no still-open client) remains for an `agentreply`.
    #[error("no interaction to reply to")]
    NoInteraction,

    /// An `agentreply` arrived for a `RequestId` that already has an agent attached.
    #[error("request {0} is already being replied to")]
    AlreadyReplying(RequestId),

    /// Anything else; logged with its source chain and surfaced as 500.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl RelayError {
    /// The `X-IWP-Reason` value reported to the side that receives the error response.
    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// The status code this error maps to when returned directly from a handler.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::StreamClosedError(_) | Self::StreamClosedWarning(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ValidationError { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::AlreadyReplying(_) => StatusCode::NOT_IMPLEMENTED,
            Self::NoInteraction => StatusCode::BAD_GATEWAY,
            Self::RangeFileError(_) | Self::PeerError { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "request failed");
        let status = self.status();
        let reason = self.reason();
        (status, [("X-IWP-Reason", reason)], ()).into_response()
    }
}
