//! The paired client+agent streaming session that spans both legs of an Interaction
//!
//! Leg 1 (client request body -> agent response) is driven entirely through
//! the waiting queues in [`super::waiting`]; an `Interaction` only exists to
//! carry the handoff for leg 2 (`agentreply` request body -> client's final
//! response), since that handoff isn't a queue lookup but a direct
//! `RequestId` lookup performed once leg 1 has already finished.

use crate::domain_types::{CustomerId, RequestId};
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use dashmap::DashMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

/// What a client, parked waiting for `agentreply`, receives once the agent claims it.
pub enum ClientLeg2Outcome {
    /// The agent claimed this Interaction; `body_rx` yields its reply body.
    Paired {
        /// Response headers translated from the `agentreply` request (§4.3 step 1).
        response_headers: HeaderMap,
        /// Response status, from `X-iwp-responsecode` if the agent set one.
        status: StatusCode,
        /// Reply body, already being pumped by the `agentreply` handler.
        body_rx: mpsc::Receiver<Bytes>,
    },
}

/// One Interaction: a client and an agent paired under a single `RequestId`.
pub struct Interaction {
    /// The `CustomerId` both sides agreed on; used to validate `agentreply`'s claim.
    pub product: CustomerId,
    leg2_waiter: Mutex<Option<oneshot::Sender<ClientLeg2Outcome>>>,
}

impl Interaction {
    fn new(product: CustomerId) -> Self {
        Self {
            product,
            leg2_waiter: Mutex::new(None),
        }
    }

    /// Called by the client handler once leg 1 finishes: registers the slot
    /// `agentreply` will later claim, returning the receiver half to await
    /// (racing it against `timeout_no_reply`).
    pub fn arm_leg2(&self) -> oneshot::Receiver<ClientLeg2Outcome> {
        let (tx, rx) = oneshot::channel();
        *self.leg2_waiter.lock().expect("interaction mutex poisoned") = Some(tx);
        rx
    }

    /// Called by `agentreply`: claims the leg-2 slot exactly once, handing
    /// over the translated response and `body_rx` to wake the parked client.
    /// Returns `false` (the `AlreadyReplying` case) if no slot is armed or it
    /// was already claimed.
    pub fn claim_leg2(
        &self,
        response_headers: HeaderMap,
        status: StatusCode,
        body_rx: mpsc::Receiver<Bytes>,
    ) -> bool {
        let Some(tx) = self
            .leg2_waiter
            .lock()
            .expect("interaction mutex poisoned")
            .take()
        else {
            return false;
        };
        tx.send(ClientLeg2Outcome::Paired {
            response_headers,
            status,
            body_rx,
        })
        .is_ok()
    }
}

/// `RequestId`-keyed table of in-flight Interactions.
#[derive(Default)]
pub struct Interactions {
    table: DashMap<RequestId, std::sync::Arc<Interaction>>,
}

impl Interactions {
    /// Creates and registers a fresh Interaction for `request_id`.
    pub fn create(&self, request_id: RequestId, product: CustomerId) -> std::sync::Arc<Interaction> {
        let interaction = std::sync::Arc::new(Interaction::new(product));
        self.table.insert(request_id, interaction.clone());
        interaction
    }

    /// Looks up an in-flight Interaction by its `RequestId`.
    #[must_use]
    pub fn get(&self, request_id: RequestId) -> Option<std::sync::Arc<Interaction>> {
        self.table.get(&request_id).map(|entry| entry.clone())
    }

    /// Removes an Interaction once both legs have finished (or failed).
    pub fn remove(&self, request_id: RequestId) {
        self.table.remove(&request_id);
    }
}
