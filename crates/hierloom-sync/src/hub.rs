//! Document liveness and archetype subscriptions.
//!
//! The hub is the only state documents share. A derived document subscribes
//! to an archetype by holding a [`Subscription`]; dropping the handle
//! unsubscribes.

use hierloom_model::DocumentId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Live,
    Deleted,
}

#[derive(Debug, Default)]
struct HubState {
    documents: BTreeMap<DocumentId, DocumentStatus>,
    /// subscription id -> (archetype, subscriber)
    subscriptions: BTreeMap<u64, (DocumentId, DocumentId)>,
    next_subscription: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, document: DocumentId) {
        self.state
            .lock()
            .documents
            .insert(document, DocumentStatus::Live);
    }

    /// Keep the document resolvable but make dependents drop it on their
    /// next refresh.
    pub fn mark_deleted(&self, document: DocumentId) {
        if let Some(status) = self.state.lock().documents.get_mut(&document) {
            *status = DocumentStatus::Deleted;
        }
    }

    pub fn forget(&self, document: DocumentId) {
        self.state.lock().documents.remove(&document);
    }

    pub fn status(&self, document: DocumentId) -> Option<DocumentStatus> {
        self.state.lock().documents.get(&document).copied()
    }

    pub fn is_live(&self, document: DocumentId) -> bool {
        self.status(document) == Some(DocumentStatus::Live)
    }

    pub fn subscribe(&self, archetype: DocumentId, subscriber: DocumentId) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.subscriptions.insert(id, (archetype, subscriber));
        tracing::debug!(archetype = %archetype, subscriber = %subscriber, "subscribed to archetype");
        Subscription {
            id,
            archetype,
            subscriber,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Documents listening to `archetype`, in subscription order.
    pub fn subscribers_of(&self, archetype: DocumentId) -> Vec<DocumentId> {
        let state = self.state.lock();
        let mut out: Vec<DocumentId> = Vec::new();
        for (a, subscriber) in state.subscriptions.values() {
            if *a == archetype && !out.contains(subscriber) {
                out.push(*subscriber);
            }
        }
        out
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }
}

/// Handle for one archetype subscription.
pub struct Subscription {
    id: u64,
    archetype: DocumentId,
    subscriber: DocumentId,
    hub: Weak<Mutex<HubState>>,
}

impl Subscription {
    pub fn archetype(&self) -> DocumentId {
        self.archetype
    }

    pub fn subscriber(&self) -> DocumentId {
        self.subscriber
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("archetype", &self.archetype)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.hub.upgrade() {
            state.lock().subscriptions.remove(&self.id);
            tracing::debug!(
                archetype = %self.archetype,
                subscriber = %self.subscriber,
                "unsubscribed from archetype"
            );
        }
    }
}
