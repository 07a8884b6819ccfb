//! Gossip-style membership: the hello/hello-port protocol (§4.5 "Membership")
//!
//! Peer servers are tracked as `DashMap<ServerName, InstancePort>` (the port
//! to dial them on), sibling ports as `DashMap<InstancePort, ()>` — the same
//! concurrent-map choice the teacher's `node_registry` makes for tracking
//! reachable peers, so no locking is needed across handlers and the startup
//! gossip fan-out that mutate them concurrently.

use crate::domain_types::{InstanceAddr, InstancePort, ServerName};
use dashmap::DashMap;

/// Tracks the other hosts (peer servers) and the sibling ports on this host
/// that this instance currently believes are alive.
#[derive(Default)]
pub struct PeerDirectory {
    servers: DashMap<ServerName, InstancePort>,
    sibling_ports: DashMap<InstancePort, ()>,
    outstanding_hellos: std::sync::atomic::AtomicI64,
    initialized: std::sync::atomic::AtomicBool,
}

impl PeerDirectory {
    /// Seeds/updates the peer server set with the port it answers gossip on.
    /// Returns `true` if this is a previously-unknown server.
    pub fn learn_server(&self, server: ServerName, port: InstancePort) -> bool {
        self.servers.insert(server, port).is_none()
    }

    /// Seeds the sibling port set, e.g. from `Config::sites` entries sharing our own host.
    pub fn learn_sibling_port(&self, port: InstancePort) -> bool {
        self.sibling_ports.insert(port, ()).is_none()
    }

    /// Drops a peer server that failed to answer gossip/range/connected calls (§4.7).
    pub fn forget_server(&self, server: &ServerName) {
        if self.servers.remove(server).is_some() {
            tracing::warn!(%server, "evicting peer server after a failed call");
        }
    }

    /// Drops a sibling port that failed to answer.
    pub fn forget_sibling_port(&self, port: InstancePort) {
        if self.sibling_ports.remove(&port).is_some() {
            tracing::warn!(%port, "evicting sibling port after a failed call");
        }
    }

    /// Every peer server currently believed reachable, with its dial port.
    #[must_use]
    pub fn known_servers(&self) -> Vec<InstanceAddr> {
        self.servers
            .iter()
            .map(|entry| InstanceAddr::new(entry.key().clone(), *entry.value()))
            .collect()
    }

    /// The first known peer server, if any (the cascade's single-hop try).
    #[must_use]
    pub fn first_server(&self) -> Option<InstanceAddr> {
        self.servers
            .iter()
            .next()
            .map(|entry| InstanceAddr::new(entry.key().clone(), *entry.value()))
    }

    /// Every sibling port currently believed reachable.
    #[must_use]
    pub fn known_sibling_ports(&self) -> Vec<InstancePort> {
        self.sibling_ports.iter().map(|entry| *entry.key()).collect()
    }

    /// The first known sibling port, if any (the cascade's single-hop try).
    #[must_use]
    pub fn first_sibling_port(&self) -> Option<InstancePort> {
        self.sibling_ports.iter().next().map(|entry| *entry.key())
    }

    /// Comma-joined `X-IWP-Hosts` value for a `/hello` response.
    #[must_use]
    pub fn hosts_header_value(&self) -> String {
        join(self.servers.iter().map(|entry| entry.key().to_string()))
    }

    /// Comma-joined `X-IWP-Ports` value for a `/hello/<port>` response.
    #[must_use]
    pub fn ports_header_value(&self) -> String {
        join(self.known_sibling_ports().iter().map(ToString::to_string))
    }

    /// Marks one outbound hello as in flight.
    pub fn hello_sent(&self) {
        self.outstanding_hellos
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    /// Marks one outbound hello as settled (answered or failed). Once the
    /// counter returns to zero, this instance is `initialized`.
    pub fn hello_settled(&self) {
        let remaining = self
            .outstanding_hellos
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst)
            - 1;
        if remaining <= 0 {
            self.initialized
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Whether startup gossip has converged (no outstanding hellos remain).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(std::sync::atomic::Ordering::SeqCst)
    }
}

fn join(values: impl Iterator<Item = String>) -> String {
    values.collect::<Vec<_>>().join(",")
}

/// Parses a `X-IWP-Hosts` comma-joined header value into bare server names
/// (ports for newly-learned hosts are inferred by the gossip caller, per
/// §4.5 — the wire protocol carries hostnames only).
pub fn parse_hosts(raw: &str) -> Vec<ServerName> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| ServerName::try_new(s.to_string()).ok())
        .collect()
}

/// Parses a `X-IWP-Ports` comma-joined header value.
pub fn parse_ports(raw: &str) -> Vec<InstancePort> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(InstancePort::parse)
        .collect()
}
