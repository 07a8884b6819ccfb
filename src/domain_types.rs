//! Domain types for the relay fabric
//!
//! Strongly-typed wrappers around the primitive values that flow through the
//! wire protocol, to keep a `CustomerId` from ever being confused with a
//! `RequestId` or a raw `u64`.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A globally unique CustomerID/ProductID, issued from a master-delegated range.
///
/// Carried on the wire as the decimal string in `X-IWP-ProductUnivId`.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct CustomerId(u64);

impl CustomerId {
    /// Parses a `CustomerId` from the decimal string carried in an `X-IWP-ProductUnivId` header.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().map(Self::new)
    }
}

/// A per-process-monotone correlation identifier for one Interaction.
///
/// Carried on the wire as the decimal string in `X-IWP-RequestId`.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct RequestId(u64);

impl RequestId {
    /// Parses a `RequestId` from the decimal string carried in an `X-IWP-RequestId` header.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().map(Self::new)
    }
}

/// Process-wide monotone generator for [`RequestId`] values.
///
/// Guarantees property 1 of the spec: no two Interactions created in one
/// process lifetime share a `RequestId`.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Creates a generator that starts issuing IDs from 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next `RequestId`, guaranteed unique within this process.
    pub fn next_id(&self) -> RequestId {
        RequestId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// The DNS name (or bare hostname) by which this instance's host is known to peers.
#[nutype(
    validate(len_char_min = 1),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct ServerName(String);

/// The TCP port an instance listens on, carried on the wire as a string
/// (per the source's `X-IWP-Port` header, which is textual, not numeric JSON).
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    Into
))]
pub struct InstancePort(u16);

impl InstancePort {
    /// Parses an `InstancePort` from the decimal string carried in an `X-IWP-Port` header.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u16>().ok().map(Self::new)
    }
}

/// `(server, port)` coordinates identifying one instance in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceAddr {
    /// DNS name of the host running the instance.
    pub server: ServerName,
    /// Port the instance listens on.
    pub port: InstancePort,
}

impl InstanceAddr {
    /// Builds an `InstanceAddr` from its two coordinates.
    #[must_use]
    pub fn new(server: ServerName, port: InstancePort) -> Self {
        Self { server, port }
    }
}
