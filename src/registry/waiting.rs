//! The two suspension queues: agents waiting for a client, clients waiting for an agent
//!
//! A waiting party doesn't block a worker thread; it hands a [`tokio::sync::oneshot::Sender`]
//! into its queue slot and `.await`s the matching receiver, racing it against its own
//! timeout. Whichever side later calls [`super::Registry::pop_waiting_agent`] or
//! [`super::Registry::pop_waiting_client`] delivers the pairing result straight through that
//! sender, waking the parked handler with no polling on either end.
//!
//! Header translation (§4.3 step 1) always needs the *source*'s original
//! request headers, and the source is always the client. When the client is
//! the discoverer (it pops a waiting agent) it already holds its own headers
//! and can translate them itself before handing the agent its outcome. When
//! the agent is the discoverer (it pops a waiting client) the client's
//! headers have to have been stashed in the queue at park time — that's why
//! [`WaitingClient`] carries a cloned [`HeaderMap`] but [`WaitingAgent`] does not.

use crate::domain_types::RequestId;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// What a parked `Agent_ready` handler receives once a client claims it.
///
/// The agent is always the destination of leg 1: it needs a receiver to
/// build its streamed response from, plus the already-translated response
/// headers and status (computed by the client, which holds the source headers).
pub enum AgentLeg1Outcome {
    /// A client claimed this wait.
    Paired {
        /// Correlates this Interaction across `agentreply`.
        request_id: RequestId,
        /// Client request body, already being pumped by the client's own handler.
        body_rx: mpsc::Receiver<Bytes>,
        /// Response headers translated from the client's request (§4.3 step 1).
        response_headers: HeaderMap,
        /// Response status, from `X-iwp-responsecode` if the client set one.
        status: StatusCode,
    },
}

/// What a parked `Client` handler receives once an agent claims it.
///
/// The client is always the source of leg 1: it needs the sender side to
/// pump its own request body into. Header translation for *this* leg is
/// performed by the agent directly (it builds its own response in place),
/// so no header payload rides along here.
pub enum ClientLeg1Outcome {
    /// An agent claimed this wait; `body_tx` is where the client pumps its request body.
    Paired {
        /// Correlates this Interaction across `agentreply`.
        request_id: RequestId,
        /// Where the client forwards its own request body chunks.
        body_tx: mpsc::Sender<Bytes>,
    },
}

/// One parked `Agent_ready` call.
pub struct WaitingAgent {
    id: u64,
    notify: oneshot::Sender<AgentLeg1Outcome>,
}

/// One parked `Client` call; keeps its own request headers around so an
/// agent popping it later can translate them without a round-trip.
pub struct WaitingClient {
    id: u64,
    headers: HeaderMap,
    notify: oneshot::Sender<ClientLeg1Outcome>,
}

/// Per-`CustomerId` queue of agents parked in `addWait`.
///
/// Popped LIFO: the freshest arrival is served first, matching the spec's
/// "most recently registered agent wins" tie-break.
#[derive(Default)]
pub struct AgentQueue(VecDeque<WaitingAgent>);

impl AgentQueue {
    pub fn push(&mut self, id: u64, notify: oneshot::Sender<AgentLeg1Outcome>) {
        self.0.push_back(WaitingAgent { id, notify });
    }

    /// Pops waiters from the back (most recent first) until one accepts
    /// `outcome` or the queue is empty. Closed waiters (their receiver
    /// already dropped, e.g. by a timeout or disconnect) are silently
    /// discarded. Returns `None` once delivered; returns the outcome back to
    /// the caller, untouched, if the queue held nobody who could take it.
    pub fn pop_accepting(&mut self, mut outcome: AgentLeg1Outcome) -> Option<AgentLeg1Outcome> {
        while let Some(waiting) = self.0.pop_back() {
            match waiting.notify.send(outcome) {
                Ok(()) => return None,
                Err(returned) => outcome = returned,
            }
        }
        Some(outcome)
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.0.len();
        self.0.retain(|w| w.id != id);
        self.0.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-`CustomerId` queue of clients parked in `addClient`.
///
/// Popped FIFO: the oldest arrival is served first, matching the spec's
/// ordering for client fairness under sustained agent scarcity.
#[derive(Default)]
pub struct ClientQueue(VecDeque<WaitingClient>);

impl ClientQueue {
    pub fn push(&mut self, id: u64, headers: HeaderMap, notify: oneshot::Sender<ClientLeg1Outcome>) {
        self.0.push_back(WaitingClient { id, headers, notify });
    }

    /// Pops the oldest still-live client (skipping any whose receiver has
    /// already been dropped by a timeout or disconnect) without delivering
    /// anything yet — the caller needs the client's headers to translate
    /// before it can build the outcome to send.
    pub fn pop_live(&mut self) -> Option<(HeaderMap, oneshot::Sender<ClientLeg1Outcome>)> {
        while let Some(waiting) = self.0.pop_front() {
            if !waiting.notify.is_closed() {
                return Some((waiting.headers, waiting.notify));
            }
        }
        None
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.0.len();
        self.0.retain(|w| w.id != id);
        self.0.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_queue_pops_most_recent_first() {
        let mut queue = AgentQueue::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        queue.push(1, tx1);
        queue.push(2, tx2);

        let request_id = RequestId::new(7);
        let (_body_tx, body_rx) = mpsc::channel(1);
        assert!(queue
            .pop_accepting(AgentLeg1Outcome::Paired {
                request_id,
                body_rx,
                response_headers: HeaderMap::new(),
                status: StatusCode::OK,
            })
            .is_none());
        drop(rx1);
        let AgentLeg1Outcome::Paired { request_id: got, .. } = rx2.await.unwrap();
        assert_eq!(got, request_id);
    }

    #[tokio::test]
    async fn client_queue_pops_oldest_first() {
        let mut queue = ClientQueue::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        queue.push(1, HeaderMap::new(), tx1);
        queue.push(2, HeaderMap::new(), tx2);

        let (_headers, notify) = queue.pop_live().unwrap();
        let request_id = RequestId::new(3);
        let (body_tx, _body_rx) = mpsc::channel(1);
        notify
            .send(ClientLeg1Outcome::Paired { request_id, body_tx })
            .map_err(|_| ())
            .unwrap();
        drop(rx2);
        let ClientLeg1Outcome::Paired { request_id: got, .. } = rx1.await.unwrap();
        assert_eq!(got, request_id);
    }

    #[test]
    fn remove_by_id_drops_only_the_matching_entry() {
        let mut queue = AgentQueue::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        queue.push(1, tx1);
        queue.push(2, tx2);
        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert!(!queue.is_empty());
    }

    #[test]
    fn pop_live_skips_closed_waiters() {
        let mut queue = ClientQueue::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        queue.push(1, HeaderMap::new(), tx1);
        queue.push(2, HeaderMap::new(), tx2);
        drop(rx1);
        let (_headers, notify) = queue.pop_live().unwrap();
        assert!(!notify.is_closed());
    }
}
