//! Body pumping primitives shared by every relay leg
//!
//! A "leg" is one direction of bytes in an Interaction: client request body
//! into an agent's response body (leg 1), or an `agentreply` request body
//! into the client's final response body (leg 2). Both legs are driven by
//! the same shape of code: read a frame from an inbound axum request body,
//! forward it into a bounded channel, repeat until the body ends or the
//! channel's receiver disappears.
//!
//! The channel's bounded capacity is what stands in for the protocol's
//! "detach read-readiness interest" backpressure policy (§4.1 of the
//! distributed design): a full channel makes `forward_body` stop polling the
//! underlying hyper body, which stops the kernel handing us more bytes off
//! the socket. No raw fd interest toggling is needed in an async-Rust
//! rendering of this.

use crate::error::RelayError;
use axum::body::{Body, Bytes};
use futures::StreamExt as _;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Forward chunk size used when no sharper hint is available.
pub const DEFAULT_CHUNK_HINT: usize = 4096;

/// Reads `body` frame by frame and forwards each data frame into `tx`.
///
/// Returns the total number of bytes forwarded on a clean end-of-body.
/// A dropped receiver (the destination side went away) surfaces as
/// [`RelayError::StreamClosedWarning`]; a read failure on the inbound body
/// (the source's own TCP connection reset) surfaces as
/// [`RelayError::StreamClosedError`].
pub async fn forward_body(mut body: Body, tx: &mpsc::Sender<Bytes>) -> Result<u64, RelayError> {
    let mut forwarded: u64 = 0;
    loop {
        let frame = match body.frame().await {
            None => break,
            Some(Ok(frame)) => frame,
            Some(Err(source)) => {
                return Err(RelayError::StreamClosedError(format!(
                    "read from source body failed: {source}"
                )));
            }
        };
        let Ok(chunk) = frame.into_data() else {
            continue;
        };
        if chunk.is_empty() {
            continue;
        }
        forwarded += chunk.len() as u64;
        if tx.send(chunk).await.is_err() {
            return Err(RelayError::StreamClosedWarning(
                "destination receiver dropped mid-stream".to_string(),
            ));
        }
    }
    Ok(forwarded)
}

/// Builds the streamed response body a destination hands back to axum once
/// it knows the bytes will arrive on `rx`.
///
/// The caller never has to keep polling anything: once this `Body` is
/// returned from a handler, axum drains `rx` on its own as it serializes the
/// HTTP response.
#[must_use]
pub fn body_from_receiver(rx: mpsc::Receiver<Bytes>) -> Body {
    Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::io::Error>))
}

/// A bounded leg channel sized so that at most `max_buffer_size` bytes sit
/// in RAM between a slow reader and a slow writer.
///
/// Capacity is expressed in chunks rather than bytes: `max_buffer_size /
/// chunk_hint` chunks may be in flight before `forward_body`'s `send` blocks.
#[must_use]
pub fn leg_channel(max_buffer_size: usize, chunk_hint: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    let capacity = (max_buffer_size / chunk_hint.max(1)).max(1);
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn forwards_all_bytes_of_a_simple_body() {
        let body = Body::from("hello world");
        let (tx, mut rx) = leg_channel(64 * 1024, DEFAULT_CHUNK_HINT);
        let forwarded = forward_body(body, &tx).await.unwrap();
        drop(tx);
        assert_eq!(forwarded, 11);
        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn dropped_receiver_surfaces_stream_closed_warning() {
        let body = Body::from("hello world");
        let (tx, rx) = leg_channel(64 * 1024, DEFAULT_CHUNK_HINT);
        drop(rx);
        let result = forward_body(body, &tx).await;
        assert!(matches!(result, Err(RelayError::StreamClosedWarning(_))));
    }

    #[tokio::test]
    async fn leg_channel_capacity_is_derived_from_buffer_budget() {
        let (tx, _rx) = leg_channel(8192, 4096);
        assert_eq!(tx.capacity(), 2);
    }
}
