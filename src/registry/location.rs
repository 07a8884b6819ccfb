//! Tracks which instance currently owns each CustomerID
//!
//! Populated lazily from `/find` responses and from `/connect` fan-out
//! acknowledgements; consulted by the client rendezvous loop before it
//! decides whether to wait locally or redirect to a peer.

use crate::domain_types::{CustomerId, InstanceAddr};
use dashmap::DashMap;

/// `CustomerId -> InstanceAddr` map of known non-local ownership.
#[derive(Default)]
pub struct LocationMap {
    table: DashMap<CustomerId, InstanceAddr>,
}

impl LocationMap {
    /// Records that `product` is owned by `addr`.
    pub fn record(&self, product: CustomerId, addr: InstanceAddr) {
        self.table.insert(product, addr);
    }

    /// Looks up the instance owning `product`, if known.
    #[must_use]
    pub fn get(&self, product: CustomerId) -> Option<InstanceAddr> {
        self.table.get(&product).map(|entry| entry.clone())
    }

    /// Forgets a CustomerID's recorded owner, e.g. once this instance has
    /// taken over ownership of it directly.
    pub fn forget(&self, product: CustomerId) {
        self.table.remove(&product);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{InstancePort, ServerName};

    #[test]
    fn records_and_forgets_ownership() {
        let map = LocationMap::default();
        let product = CustomerId::new(1);
        let addr = InstanceAddr::new(ServerName::try_new("peer").unwrap(), InstancePort::new(9000));
        map.record(product, addr.clone());
        assert_eq!(map.get(product), Some(addr));
        map.forget(product);
        assert_eq!(map.get(product), None);
    }
}
