//! Header translation and chunk-size selection shared by both relay legs
//!
//! The actual byte pump lives in [`crate::stream`]; this module is the part
//! of §4.3 that doesn't belong in a generic body-forwarding helper — copying
//! headers onto the destination response, stamping a missing `RequestId`,
//! parsing an explicit status-code override, and picking the forward chunk
//! size a leg's channel should be sized around.

use crate::config::BufferSizeTable;
use crate::domain_types::RequestId;
use crate::error::RelayError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Request header carrying the Interaction's correlation id.
pub const REQUEST_ID_HEADER: &str = "x-iwp-requestid";
/// Request header an `agentreply` may set to override the client's response status.
pub const RESPONSE_CODE_HEADER: &str = "x-iwp-responsecode";

/// Headers hop-by-hop or transport-owned that must never be copied verbatim
/// from a source request onto a destination response: the destination's
/// body is produced by a fresh streamed channel, not the source's framing.
const STRIPPED_HEADERS: &[&str] = &["content-length", "transfer-encoding", "host", "connection"];

/// §4.3 step 1: copy `source_headers` onto a fresh response header map,
/// stamping `X-IWP-RequestId` when the source didn't set one, and pulling
/// out an explicit `X-iwp-responsecode` override if present.
///
/// # Errors
///
/// Returns [`RelayError::MalformedRequest`] if `X-iwp-responsecode` is set
/// but isn't a valid HTTP status code.
pub fn translate_headers(
    source_headers: &HeaderMap,
    request_id: RequestId,
) -> Result<(HeaderMap, StatusCode), RelayError> {
    let mut headers = HeaderMap::with_capacity(source_headers.len());
    for (name, value) in source_headers {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if !headers.contains_key(REQUEST_ID_HEADER) {
        let value = HeaderValue::from_str(&request_id.to_string())
            .expect("a decimal RequestId is always a valid header value");
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    let status = match headers.get(RESPONSE_CODE_HEADER) {
        None => StatusCode::OK,
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                RelayError::MalformedRequest(format!("{RESPONSE_CODE_HEADER} header is not ASCII"))
            })?;
            raw.trim()
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or_else(|| {
                    RelayError::MalformedRequest(format!(
                        "{RESPONSE_CODE_HEADER} {raw:?} is not a valid HTTP status code"
                    ))
                })?
        }
    };

    Ok((headers, status))
}

/// §4.3 step 2: picks the forward chunk size hint for a leg, given the
/// source's advertised `Content-Length` (if any). A leg channel's capacity
/// (see [`crate::stream::leg_channel`]) is derived from this hint, the way
/// `buffer_size` picks the read/write chunk size in the source protocol.
#[must_use]
pub fn chunk_hint_for(content_length: Option<u64>, table: &BufferSizeTable) -> usize {
    table.chunk_size_for(content_length.unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn stamps_request_id_when_absent() {
        let headers = HeaderMap::new();
        let (translated, status) = translate_headers(&headers, RequestId::new(42)).unwrap();
        assert_eq!(translated.get(REQUEST_ID_HEADER).unwrap(), "42");
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn preserves_an_explicit_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("7"));
        let (translated, _) = translate_headers(&headers, RequestId::new(42)).unwrap();
        assert_eq!(translated.get(REQUEST_ID_HEADER).unwrap(), "7");
    }

    #[test]
    fn parses_an_explicit_response_code_override() {
        let mut headers = HeaderMap::new();
        headers.insert(RESPONSE_CODE_HEADER, HeaderValue::from_static("201"));
        let (_, status) = translate_headers(&headers, RequestId::new(1)).unwrap();
        assert_eq!(status, StatusCode::CREATED);
    }

    #[test]
    fn rejects_an_unparsable_response_code() {
        let mut headers = HeaderMap::new();
        headers.insert(RESPONSE_CODE_HEADER, HeaderValue::from_static("not-a-status"));
        assert!(translate_headers(&headers, RequestId::new(1)).is_err());
    }

    #[test]
    fn strips_transport_owned_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("10"));
        headers.insert("host", HeaderValue::from_static("example.com"));
        let (translated, _) = translate_headers(&headers, RequestId::new(1)).unwrap();
        assert!(translated.get("content-length").is_none());
        assert!(translated.get("host").is_none());
    }

    #[test]
    fn chunk_hint_falls_back_to_default_table_for_unknown_length() {
        let table = BufferSizeTable::default();
        assert_eq!(chunk_hint_for(None, &table), 4096);
        assert_eq!(chunk_hint_for(Some(10), &table), 4096);
    }
}
