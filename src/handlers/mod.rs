//! The eight HTTP endpoints that drive Registry and Relay (§4.4, §4.5)
//!
//! Each submodule owns one protocol state machine: [`agent`] for the
//! desktop-facing `Agent_ready`/`Agent_reply`/`ping` trio, [`client`] for the
//! mobile-facing rendezvous loop, and [`directory`] for the cluster-internal
//! gossip/range/location endpoints `InstanceDirectory` answers on behalf of
//! peer instances.

pub mod agent;
pub mod client;
pub mod directory;

use crate::domain_types::{CustomerId, RequestId};
use crate::error::RelayError;
use axum::http::HeaderMap;

/// Header carrying the ProductID/CustomerID a request concerns.
pub const PRODUCT_ID_HEADER: &str = "x-iwp-productunivid";

/// Header set to `"0"` on an `Agent_ready`/`Client` "nobody showed up" reply (§4.7).
pub const RESPONSE_TYPE_HEADER: &str = "x-iwp-responsetype";

/// Extracts and parses the required `X-IWP-ProductUnivId` header.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the header is missing or not
/// a valid decimal `CustomerId`.
pub fn product_id(headers: &HeaderMap) -> Result<CustomerId, RelayError> {
    headers
        .get(PRODUCT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(CustomerId::parse)
        .ok_or_else(|| RelayError::MalformedRequest(format!("missing or invalid {PRODUCT_ID_HEADER}")))
}

/// Extracts and parses the required `X-IWP-RequestId` header.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if the header is missing or not
/// a valid decimal `RequestId`.
pub fn request_id(headers: &HeaderMap) -> Result<RequestId, RelayError> {
    headers
        .get(crate::relay::REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(RequestId::parse)
        .ok_or_else(|| {
            RelayError::MalformedRequest(format!("missing or invalid {}", crate::relay::REQUEST_ID_HEADER))
        })
}

/// Reads `Content-Length` off an inbound request, if present and well-formed.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse().ok())
}
