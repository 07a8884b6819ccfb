//! In-memory state every handler reaches through: waiting queues, the agent
//! cache, in-flight Interactions, and CustomerID location knowledge.
//!
//! Every table here is a `DashMap`, the same concurrent-table choice the
//! teacher's agent registry makes, so no handler ever blocks another on an
//! unrelated `CustomerId`.

pub mod cache;
pub mod interaction;
pub mod location;
pub mod waiting;

use crate::domain_types::{CustomerId, RequestId};
use axum::http::HeaderMap;
use cache::AgentCache;
use dashmap::DashMap;
use interaction::{Interaction, Interactions};
use location::LocationMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use waiting::{AgentLeg1Outcome, AgentQueue, ClientLeg1Outcome, ClientQueue};

/// Bundles every table a relay instance needs to pair agents with clients.
#[derive(Default)]
pub struct Registry {
    waiting_agents: DashMap<CustomerId, Mutex<AgentQueue>>,
    waiting_clients: DashMap<CustomerId, Mutex<ClientQueue>>,
    cache: AgentCache,
    interactions: Interactions,
    location: LocationMap,
    next_wait_id: AtomicU64,
}

impl Registry {
    /// Shared accessor for the agent cache (TTL presence records).
    #[must_use]
    pub fn cache(&self) -> &AgentCache {
        &self.cache
    }

    /// Shared accessor for the CustomerID ownership map.
    #[must_use]
    pub fn location(&self) -> &LocationMap {
        &self.location
    }

    /// Registers a fresh Interaction for `request_id`.
    #[must_use]
    pub fn create_interaction(&self, request_id: RequestId, product: CustomerId) -> Arc<Interaction> {
        self.interactions.create(request_id, product)
    }

    /// Looks up an in-flight Interaction.
    #[must_use]
    pub fn interaction(&self, request_id: RequestId) -> Option<Arc<Interaction>> {
        self.interactions.get(request_id)
    }

    /// Drops an Interaction once both legs have concluded.
    pub fn remove_interaction(&self, request_id: RequestId) {
        self.interactions.remove(request_id);
    }

    /// `addWait`: parks an `Agent_ready` call for `product`, returning an id
    /// (for later `removeWait`) and the receiver to await against a timeout.
    pub fn add_wait_agent(
        &self,
        product: CustomerId,
    ) -> (u64, oneshot::Receiver<AgentLeg1Outcome>) {
        let id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting_agents
            .entry(product)
            .or_default()
            .lock()
            .expect("agent queue mutex poisoned")
            .push(id, tx);
        (id, rx)
    }

    /// `removeWait`: evicts a parked agent by identity (timeout or connection
    /// close) and registers the cache entry the spec requires on removal.
    pub fn remove_wait_agent(&self, product: CustomerId, id: u64, now: std::time::Instant) {
        if let Some(queue) = self.waiting_agents.get(&product) {
            queue
                .lock()
                .expect("agent queue mutex poisoned")
                .remove(id);
        }
        self.cache.record(product, now);
    }

    /// `addClient`: parks a `Client` call for `product`, stashing its request
    /// headers so whichever agent later pops it can translate them (§4.3 step 1).
    pub fn add_wait_client(
        &self,
        product: CustomerId,
        headers: HeaderMap,
    ) -> (u64, oneshot::Receiver<ClientLeg1Outcome>) {
        let id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting_clients
            .entry(product)
            .or_default()
            .lock()
            .expect("client queue mutex poisoned")
            .push(id, headers, tx);
        (id, rx)
    }

    /// Evicts a parked client by identity (timed-out re-poll, connection close).
    pub fn remove_wait_client(&self, product: CustomerId, id: u64) {
        if let Some(queue) = self.waiting_clients.get(&product) {
            queue
                .lock()
                .expect("client queue mutex poisoned")
                .remove(id);
        }
    }

    /// `getAgent`: called by a `Client` handler. Pops the freshest waiting
    /// agent (LIFO) and delivers `outcome` to it, trying the next waiter if
    /// one has already gone silent. Returns the outcome back, undelivered,
    /// if nobody was waiting.
    pub fn pop_waiting_agent(
        &self,
        product: CustomerId,
        outcome: AgentLeg1Outcome,
        now: std::time::Instant,
    ) -> Option<AgentLeg1Outcome> {
        let Some(queue) = self.waiting_agents.get(&product) else {
            return Some(outcome);
        };
        let result = queue
            .lock()
            .expect("agent queue mutex poisoned")
            .pop_accepting(outcome);
        if result.is_none() {
            self.cache.record(product, now);
        }
        result
    }

    /// `getClient`: called by an `Agent_ready` handler. Claims the oldest
    /// still-live waiting client (FIFO) without delivering anything yet —
    /// the caller (the active agent) holds its own destination response and
    /// needs the client's stashed headers to translate them (§4.3 step 1)
    /// before sending a [`ClientLeg1Outcome`] back through the returned sender.
    pub fn pop_waiting_client(
        &self,
        product: CustomerId,
    ) -> Option<(HeaderMap, oneshot::Sender<ClientLeg1Outcome>)> {
        let queue = self.waiting_clients.get(&product)?;
        queue.lock().expect("client queue mutex poisoned").pop_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::RequestId;
    use std::time::Instant;

    fn agent_outcome(request_id: RequestId) -> (AgentLeg1Outcome, tokio::sync::mpsc::Sender<bytes::Bytes>) {
        let (body_tx, body_rx) = tokio::sync::mpsc::channel(1);
        (
            AgentLeg1Outcome::Paired {
                request_id,
                body_rx,
                response_headers: HeaderMap::new(),
                status: axum::http::StatusCode::OK,
            },
            body_tx,
        )
    }

    #[tokio::test]
    async fn client_pairs_with_a_previously_waiting_agent() {
        let registry = Registry::default();
        let product = CustomerId::new(1);
        let (_id, rx) = registry.add_wait_agent(product);

        let request_id = RequestId::new(1);
        let (outcome, _body_tx) = agent_outcome(request_id);
        let result = registry.pop_waiting_agent(product, outcome, Instant::now());
        assert!(result.is_none());

        let AgentLeg1Outcome::Paired { request_id: got, .. } = rx.await.unwrap();
        assert_eq!(got, request_id);
        assert!(registry.cache().is_fresh(product, Instant::now(), std::time::Duration::from_secs(1)));
    }

    #[test]
    fn pop_waiting_agent_returns_outcome_when_nobody_is_waiting() {
        let registry = Registry::default();
        let product = CustomerId::new(2);
        let (outcome, _body_tx) = agent_outcome(RequestId::new(2));
        let result = registry.pop_waiting_agent(product, outcome, Instant::now());
        assert!(result.is_some());
    }

    #[test]
    fn remove_wait_agent_evicts_and_caches() {
        let registry = Registry::default();
        let product = CustomerId::new(3);
        let (id, _rx) = registry.add_wait_agent(product);
        let now = Instant::now();
        registry.remove_wait_agent(product, id, now);
        assert!(registry.cache().is_fresh(product, now, std::time::Duration::from_secs(1)));

        let (outcome, _body_tx) = agent_outcome(RequestId::new(3));
        let result = registry.pop_waiting_agent(product, outcome, now);
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn agent_pairs_with_a_previously_waiting_client() {
        let registry = Registry::default();
        let product = CustomerId::new(4);
        let mut headers = HeaderMap::new();
        headers.insert("x-custom", "value".parse().unwrap());
        let (_id, rx) = registry.add_wait_client(product, headers.clone());

        let (got_headers, notify) = registry.pop_waiting_client(product).unwrap();
        assert_eq!(got_headers.get("x-custom"), headers.get("x-custom"));

        let request_id = RequestId::new(4);
        let (body_tx, _body_rx) = tokio::sync::mpsc::channel(1);
        notify
            .send(ClientLeg1Outcome::Paired { request_id, body_tx })
            .map_err(|_| ())
            .unwrap();

        let ClientLeg1Outcome::Paired { request_id: got, .. } = rx.await.unwrap();
        assert_eq!(got, request_id);
    }

    #[test]
    fn pop_waiting_client_returns_none_when_nobody_is_waiting() {
        let registry = Registry::default();
        assert!(registry.pop_waiting_client(CustomerId::new(5)).is_none());
    }
}
