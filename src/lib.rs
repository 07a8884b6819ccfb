//! # relaymesh — a rendezvous and streaming relay fabric
//!
//! relaymesh pairs long-running Desktop agents with short-lived Mobile App
//! clients across a horizontally scaled fleet of relay instances. Neither
//! side ever talks to the other directly or knows the other's address;
//! every request is a plain HTTP POST to whichever relay instance is
//! closest, and the fabric itself handles discovery, rendezvous, and
//! bidirectional body streaming between the two legs of one Interaction.
//!
//! ## Core components
//!
//! - [`registry`]: the in-memory waiting queues, agent presence cache, and
//!   in-flight Interaction table that pair one `Agent_ready` call with one
//!   `Client` call under a single `RequestId`.
//! - [`relay`]: header translation and forward-chunk-size selection shared
//!   by both legs of an Interaction.
//! - [`stream`]: the bounded-channel body pump both legs forward bytes
//!   through, reproducing the wire protocol's backpressure policy without a
//!   hand-rolled socket read-interest toggle.
//! - [`directory`]: `InstanceDirectory`, the piece that talks to other
//!   relay processes — gossip (`/hello`), CustomerID range delegation
//!   (`/range`), and the `/find` cascade that locates which instance
//!   currently owns a given ProductID.
//! - [`handlers`]: the HTTP endpoints that drive the above, split into the
//!   Desktop-facing `agent` trio, the Mobile-App-facing `client` loop, and
//!   the cluster-internal `directory` endpoints peer instances answer on
//!   each other's behalf.
//! - [`server`]: `AppState` and the axum route table wiring it all together.

pub mod config;
pub mod directory;
pub mod domain_types;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stream;
pub mod time_provider;
