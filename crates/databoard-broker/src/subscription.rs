//! Subscription Table
//!
//! The broker's only shared mutable state besides the client registry.
//! A subscription exists in the table iff its client set is non-empty;
//! removing the last client deletes the entry, and dropping an entry
//! aborts its scheduler and feed tasks synchronously.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::message::BusMessage;

/// Broker-side record of one `provider.operation` broadcast group.
pub(crate) struct Subscription {
    /// Subscribed client ids, in join order.
    pub clients: Vec<String>,
    /// Invocation parameters fixed at creation time.
    pub params: Option<Value>,
    /// Most recent successfully broadcast message.
    pub cached: Option<BusMessage>,
    /// Poll ticker handle; present only for poll-mode subscriptions.
    pub timer: Option<JoinHandle<()>>,
    /// Push forwarder handle; present only for push-mode subscriptions.
    pub feed: Option<JoinHandle<()>>,
    /// Set while a poll call is running, so ticks never overlap.
    pub in_flight: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(client_id: &str, params: Option<Value>) -> Self {
        Self {
            clients: vec![client_id.to_string()],
            params,
            cached: None,
            timer: None,
            feed: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a client; an already-present id is a no-op.
    pub(crate) fn add_client(&mut self, id: &str) {
        if !self.clients.iter().any(|c| c == id) {
            self.clients.push(id.to_string());
        }
    }

    pub(crate) fn remove_client(&mut self, id: &str) {
        self.clients.retain(|c| c != id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Abort is synchronous: once the entry leaves the table no tick
        // or push delivery may fire for it.
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

/// Introspection snapshot of a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    /// Subscribed client ids, in join order.
    pub clients: Vec<String>,
    /// Most recent successfully broadcast message, if any.
    pub cached: Option<BusMessage>,
    /// Whether a poll ticker is attached.
    pub has_timer: bool,
}

/// Outcome of [`SubscriptionTable::join_or_create`].
pub(crate) enum JoinOutcome {
    /// The subscription already existed; the client joined its set.
    Joined,
    /// A new subscription was created with the client as sole member.
    /// Carries the entry's in-flight flag for the scheduler.
    Created(Arc<AtomicBool>),
}

/// The shared table of active subscriptions.
#[derive(Clone, Default)]
pub(crate) struct SubscriptionTable {
    entries: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Atomically join an existing subscription or create a new one.
    ///
    /// Check and insert happen under one write lock so two concurrent
    /// subscribes for the same new id cannot both create an entry.
    pub(crate) async fn join_or_create(
        &self,
        id: &str,
        client_id: &str,
        params: Option<Value>,
    ) -> JoinOutcome {
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(subscription) => {
                subscription.add_client(client_id);
                JoinOutcome::Joined
            }
            None => {
                let subscription = Subscription::new(client_id, params);
                let in_flight = subscription.in_flight.clone();
                entries.insert(id.to_string(), subscription);
                JoinOutcome::Created(in_flight)
            }
        }
    }

    /// Remove a client from a subscription, deleting the entry when its
    /// client set becomes empty.
    ///
    /// Returns `None` when no such subscription exists, otherwise whether
    /// the entry was deleted.
    pub(crate) async fn remove_client(&self, id: &str, client_id: &str) -> Option<bool> {
        let mut entries = self.entries.write().await;
        let subscription = entries.get_mut(id)?;
        subscription.remove_client(client_id);
        if subscription.clients.is_empty() {
            entries.remove(id);
            Some(true)
        } else {
            Some(false)
        }
    }

    /// Ids of all subscriptions containing `client_id`.
    pub(crate) async fn subscriptions_of(&self, client_id: &str) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, subscription)| subscription.clients.iter().any(|c| c == client_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Store the latest successful message; returns false when the
    /// subscription no longer exists.
    pub(crate) async fn set_cached(&self, id: &str, message: BusMessage) -> bool {
        match self.entries.write().await.get_mut(id) {
            Some(subscription) => {
                subscription.cached = Some(message);
                true
            }
            None => false,
        }
    }

    /// Client set read at broadcast time.
    pub(crate) async fn clients_of(&self, id: &str) -> Option<Vec<String>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|subscription| subscription.clients.clone())
    }

    /// Store the poll ticker handle, or abort it when the subscription
    /// was torn down while its initial fetch was in flight.
    pub(crate) async fn attach_timer(&self, id: &str, handle: JoinHandle<()>) {
        match self.entries.write().await.get_mut(id) {
            Some(subscription) => subscription.timer = Some(handle),
            None => handle.abort(),
        }
    }

    /// Store the push forwarder handle, with the same teardown rule as
    /// [`Self::attach_timer`].
    pub(crate) async fn attach_feed(&self, id: &str, handle: JoinHandle<()>) {
        match self.entries.write().await.get_mut(id) {
            Some(subscription) => subscription.feed = Some(handle),
            None => handle.abort(),
        }
    }

    /// Introspection snapshot of every subscription.
    pub(crate) async fn snapshot(&self) -> HashMap<String, SubscriptionInfo> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, subscription)| {
                (
                    id.clone(),
                    SubscriptionInfo {
                        clients: subscription.clients.clone(),
                        cached: subscription.cached.clone(),
                        has_timer: subscription.timer.is_some(),
                    },
                )
            })
            .collect()
    }

    /// Drop every subscription, aborting all attached tasks.
    pub(crate) async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    pub(crate) async fn insert(&self, id: &str, subscription: Subscription) {
        self.entries
            .write()
            .await
            .insert(id.to_string(), subscription);
    }
}
