//! Inter-instance membership, range delegation, and location lookup (§4.5)
//!
//! `InstanceDirectory` is the one piece of this crate that talks to other
//! processes in the fleet: it gossips `/hello`, carves CustomerID ranges out
//! of a master-delegated pool, and cascades `/find` lookups to locate the
//! instance that owns a given `CustomerId`. Every outbound call goes through
//! a single `reqwest::Client` gated by a `Semaphore` sized to
//! `http_max_clients`, reproducing the "bounded async HTTP client" of §2
//! without a hand-rolled connection pool.

pub mod client;
pub mod membership;
pub mod range;

use crate::config::Config;
use crate::domain_types::{InstanceAddr, InstancePort, ServerName};
use crate::error::RelayError;
use membership::PeerDirectory;
use range::RangeFile;
use reqwest::Client as HttpClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Coordinates gossip, range allocation, and location lookup for one instance.
///
/// Cheaply `Clone`: every field is an `Arc` or already-shared handle, so a
/// clone can be moved into a detached `tokio::spawn` task (the master-refill
/// backfill in [`InstanceDirectory::issue_customer_id`]) while still sharing
/// the same peer sets, range files, and in-flight-refill flag as the original.
#[derive(Clone)]
pub struct InstanceDirectory {
    config: Config,
    http: HttpClient,
    concurrency: Arc<Semaphore>,
    peers: Arc<PeerDirectory>,
    own_range: Arc<RangeFile>,
    master_range: Option<Arc<RangeFile>>,
    /// Set while a background refill from the master is in flight, so
    /// `issue_customer_id` doesn't spawn a second one and doesn't keep
    /// re-attempting a carve it already knows the own range can't satisfy.
    need_range: Arc<AtomicBool>,
}

impl InstanceDirectory {
    /// Builds a directory for `config`, loading this instance's own range
    /// file (and the master range file, if this instance is the master).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if a range file exists but is
    /// unreadable or corrupt — fatal at startup per §7.
    pub async fn new(config: Config) -> Result<Self, RelayError> {
        let own_range = RangeFile::load(&config.range_file).await?;
        let master_range = if config.is_master {
            Some(RangeFile::load(&config.master_range).await?)
        } else {
            None
        };

        let peers = PeerDirectory::default();
        for site in &config.sites {
            if site.host == config.server {
                if site.port != config.port {
                    peers.learn_sibling_port(site.port);
                }
            } else {
                peers.learn_server(site.host.clone(), site.port);
            }
        }

        let permits = usize::from(config.http_max_clients.into_inner() > 0)
            * config.http_max_clients.into_inner();
        Ok(Self {
            http: HttpClient::new(),
            concurrency: Arc::new(Semaphore::new(permits.max(1))),
            peers: Arc::new(peers),
            own_range: Arc::new(own_range),
            master_range: master_range.map(Arc::new),
            need_range: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// The peer membership tables.
    #[must_use]
    pub fn peers(&self) -> &PeerDirectory {
        self.peers.as_ref()
    }

    /// This instance's own configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether this instance owns the cluster-wide `master_range`.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.config.is_master
    }

    /// This instance's own coordinates.
    #[must_use]
    pub fn own_addr(&self) -> InstanceAddr {
        InstanceAddr::new(self.config.server.clone(), self.config.port)
    }

    fn base_url(server: &ServerName, port: InstancePort) -> String {
        format!("http://{server}:{port}")
    }

    /// Issues a bounded outbound POST to `addr{path}` carrying `headers`.
    ///
    /// Acquires a permit from the `http_max_clients` semaphore first, so at
    /// most that many calls are ever in flight across the whole directory.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::PeerError`] if the request fails or the peer
    /// responds with a non-2xx status.
    pub async fn call(
        &self,
        addr: InstanceAddr,
        path: &str,
        headers: &[(&'static str, String)],
    ) -> Result<reqwest::Response, RelayError> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .expect("directory semaphore is never closed");
        let url = format!("{}{path}", Self::base_url(&addr.server, addr.port));
        let mut builder = self.http.post(&url);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|source| RelayError::PeerError {
                peer: url.clone(),
                source,
            })?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RelayError::PeerError {
                peer: url,
                source: response
                    .error_for_status()
                    .expect_err("checked status is not success"),
            })
        }
    }

    /// Gossips `/hello` to every configured peer server and `/hello/<port>`
    /// to every sibling port, folding newly-learned peers back into the
    /// fan-out until the outstanding-hello counter returns to zero.
    pub async fn bootstrap(&self) {
        let mut frontier: Vec<InstanceAddr> = self.peers.known_servers();
        let mut sibling_frontier: Vec<InstancePort> = self.peers.known_sibling_ports();

        while !frontier.is_empty() || !sibling_frontier.is_empty() {
            let mut next_frontier = Vec::new();
            for peer in frontier.drain(..) {
                self.peers.hello_sent();
                match self.hello(peer.clone()).await {
                    Ok(learned) => {
                        for server in learned {
                            if self.peers.learn_server(server.clone(), peer.port) {
                                next_frontier.push(InstanceAddr::new(server, peer.port));
                            }
                        }
                    }
                    Err(_) => self.peers.forget_server(&peer.server),
                }
                self.peers.hello_settled();
            }

            let mut next_sibling_frontier = Vec::new();
            for port in sibling_frontier.drain(..) {
                self.peers.hello_sent();
                let addr = InstanceAddr::new(self.config.server.clone(), port);
                match self.hello_port(addr).await {
                    Ok(learned_ports) => {
                        for learned_port in learned_ports {
                            if self.peers.learn_sibling_port(learned_port) {
                                next_sibling_frontier.push(learned_port);
                            }
                        }
                    }
                    Err(_) => self.peers.forget_sibling_port(port),
                }
                self.peers.hello_settled();
            }

            frontier = next_frontier;
            sibling_frontier = next_sibling_frontier;
        }
    }

    async fn hello(&self, peer: InstanceAddr) -> Result<Vec<ServerName>, RelayError> {
        let response = self
            .call(
                peer,
                "/hello",
                &[
                    ("X-IWP-Host", self.config.server.to_string()),
                    ("X-IWP-Port", self.config.port.to_string()),
                ],
            )
            .await?;
        let hosts = header_value(&response, "X-IWP-Hosts").unwrap_or_default();
        Ok(membership::parse_hosts(&hosts))
    }

    async fn hello_port(&self, sibling: InstanceAddr) -> Result<Vec<InstancePort>, RelayError> {
        let response = self
            .call(
                sibling.clone(),
                &format!("/hello/{}", sibling.port),
                &[
                    ("X-IWP-Host", self.config.server.to_string()),
                    ("X-IWP-Port", self.config.port.to_string()),
                ],
            )
            .await?;
        let ports = header_value(&response, "X-IWP-Ports").unwrap_or_default();
        Ok(membership::parse_ports(&ports))
    }

    /// §4.5 `/getuniversalid`: carves a single fresh `CustomerId` from this
    /// instance's own range. If the pool just emptied, kicks off a detached
    /// refill from the master (falling back to peers) without blocking this
    /// caller's answer — the next caller succeeds once it lands.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the range file can't be rewritten.
    pub async fn issue_customer_id(&self) -> Result<Option<u64>, RelayError> {
        if self.need_range.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let carved = self.own_range.carve(Some(1), 0.0).await?;
        if self.own_range.is_empty().await && !self.need_range.swap(true, Ordering::SeqCst) {
            tracing::info!("own CustomerID range exhausted, spawning a refill from the master");
            let directory = self.clone();
            tokio::spawn(async move {
                directory.request_range_if_needed().await;
                directory.need_range.store(false, Ordering::SeqCst);
            });
        }
        Ok(carved.map(|(from, _to)| from))
    }

    /// §4.5 `/range` handling when this instance IS the master: carve a
    /// sub-range out of `master_range` directly.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the master range file can't be rewritten.
    /// Returns [`RelayError::Internal`] if called on a non-master instance.
    pub async fn carve_for_peer(
        &self,
        requested_size: Option<u64>,
    ) -> Result<Option<(u64, u64)>, RelayError> {
        let master_range = self.master_range.as_ref().ok_or_else(|| {
            RelayError::Internal(anyhow::anyhow!("carve_for_peer called on a non-master instance"))
        })?;
        master_range.carve(requested_size, 0.1).await
    }

    /// §4.5 non-master startup bootstrap: if our own range is empty, ask the
    /// master for a fresh allocation, falling back to peers (servers, then
    /// sibling ports) in order until one responds with a non-empty range.
    pub async fn request_range_if_needed(&self) {
        if !self.own_range.is_empty().await {
            return;
        }
        if let Some((from, to)) = self.request_range_from_master().await {
            let _ = self.own_range.replace(from, to).await;
            return;
        }
        for peer in self.peers.known_servers() {
            if let Some((from, to)) = self.request_range_from(peer.clone()).await {
                let _ = self.own_range.replace(from, to).await;
                return;
            }
            self.peers.forget_server(&peer.server);
        }
        for port in self.peers.known_sibling_ports() {
            let addr = InstanceAddr::new(self.config.server.clone(), port);
            if let Some((from, to)) = self.request_range_from(addr).await {
                let _ = self.own_range.replace(from, to).await;
                return;
            }
            self.peers.forget_sibling_port(port);
        }
        tracing::warn!("no peer could supply a CustomerID range at startup");
    }

    async fn request_range_from_master(&self) -> Option<(u64, u64)> {
        let master = InstanceAddr::new(self.config.master.host.clone(), self.config.master.port);
        self.request_range_from(master).await
    }

    /// §4.5 `/range` handling: carves locally if this instance is the
    /// master, otherwise forwards the request on to the master and relays
    /// back whatever range it grants.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RangeFileError`] if the master range file can't be rewritten.
    pub async fn carve_or_delegate(
        &self,
        requested_size: Option<u64>,
    ) -> Result<Option<(u64, u64)>, RelayError> {
        if self.is_master() {
            self.carve_for_peer(requested_size).await
        } else {
            Ok(self.forward_range_to_master(requested_size).await)
        }
    }

    async fn forward_range_to_master(&self, requested_size: Option<u64>) -> Option<(u64, u64)> {
        let master = InstanceAddr::new(self.config.master.host.clone(), self.config.master.port);
        let mut headers = vec![
            ("X-IWP-Host", self.config.server.to_string()),
            ("X-IWP-Port", self.config.port.to_string()),
        ];
        if let Some(size) = requested_size {
            headers.push(("X-IWP-Range-Size", size.to_string()));
        }
        let response = self.call(master, "/range", &headers).await.ok()?;
        let from: u64 = header_value(&response, "X-IWP-Range-From")?.parse().ok()?;
        let to: u64 = header_value(&response, "X-IWP-Range-To")?.parse().ok()?;
        Some((from, to))
    }

    async fn request_range_from(&self, peer: InstanceAddr) -> Option<(u64, u64)> {
        let response = self
            .call(
                peer,
                "/range",
                &[
                    ("X-IWP-Host", self.config.server.to_string()),
                    ("X-IWP-Port", self.config.port.to_string()),
                    (
                        "X-IWP-Range-Size",
                        self.config.range_size.into_inner().to_string(),
                    ),
                ],
            )
            .await
            .ok()?;
        let from: u64 = header_value(&response, "X-IWP-Range-From")?.parse().ok()?;
        let to: u64 = header_value(&response, "X-IWP-Range-To")?.parse().ok()?;
        Some((from, to))
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}
