//! Location lookup and connect-announce fan-out (§4.5 "Connection notification" / "Location lookup")

use super::InstanceDirectory;
use crate::domain_types::{CustomerId, InstanceAddr};
use crate::registry::Registry;

impl InstanceDirectory {
    /// §4.5 `app_Client` cascade: tries one sibling port, then one peer
    /// server, issuing `/find` and caching a positive answer into
    /// `registry`'s `LocationMap`. Returns `None` if neither hop knows.
    pub async fn find_desktop(
        &self,
        registry: &Registry,
        product: CustomerId,
    ) -> Option<InstanceAddr> {
        if let Some(sibling_port) = self.peers().first_sibling_port() {
            let addr = InstanceAddr::new(self.config().server.clone(), sibling_port);
            if let Some(found) = self.query_find(addr, product).await {
                registry.location().record(product, found.clone());
                return Some(found);
            }
        }

        if let Some(peer) = self.peers().first_server() {
            if let Some(found) = self.query_find(peer, product).await {
                registry.location().record(product, found.clone());
                return Some(found);
            }
        }

        None
    }

    async fn query_find(&self, addr: InstanceAddr, product: CustomerId) -> Option<InstanceAddr> {
        let response = self
            .call(addr, "/find", &[("X-IWP-ProductUnivId", product.to_string())])
            .await
            .ok()?;
        let host = response.headers().get("X-IWP-Host")?.to_str().ok()?;
        let port = response.headers().get("X-IWP-Port")?.to_str().ok()?;
        let server = crate::domain_types::ServerName::try_new(host.to_string()).ok()?;
        let port = crate::domain_types::InstancePort::parse(port)?;
        Some(InstanceAddr::new(server, port))
    }

    /// §4.5 `agent_Connect` fan-out: announces `self_addr` owns `product` to
    /// every known peer server (`/connected`) and sibling port
    /// (`/connected/<port>`). Failures just drop the peer from membership.
    pub async fn announce_connect(&self, product: CustomerId) {
        let headers = [
            ("X-IWP-ProductUnivId", product.to_string()),
            ("X-IWP-Host", self.config().server.to_string()),
            ("X-IWP-Port", self.config().port.to_string()),
        ];

        for peer in self.peers().known_servers() {
            if self.call(peer.clone(), "/connected", &headers).await.is_err() {
                self.peers().forget_server(&peer.server);
            }
        }

        for port in self.peers().known_sibling_ports() {
            let addr = InstanceAddr::new(self.config().server.clone(), port);
            if self
                .call(addr, &format!("/connected/{port}"), &headers)
                .await
                .is_err()
            {
                self.peers().forget_sibling_port(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn find_desktop_returns_none_with_no_peers_configured() {
        let config = Config::development();
        let directory = InstanceDirectory::new(config).await.unwrap();
        let registry = Registry::default();
        let result = directory.find_desktop(&registry, CustomerId::new(1)).await;
        assert!(result.is_none());
    }
}
