//! Call Executor
//!
//! Invokes provider operations and normalizes their outcome into a
//! broadcast message. The executor always settles with a message,
//! success or failure; provider failures never propagate to the caller.

use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::client::ClientRegistry;
use crate::message::{BusMessage, CallFailure, API_DATA, API_ERROR};
use crate::provider::FetchFn;
use crate::subscription::SubscriptionTable;

/// Runs provider operations and fans the outcome out to the operation's
/// current subscribers.
#[derive(Clone)]
pub struct CallExecutor {
    clients: ClientRegistry,
    subscriptions: SubscriptionTable,
}

impl CallExecutor {
    pub(crate) fn new(clients: ClientRegistry, subscriptions: SubscriptionTable) -> Self {
        Self {
            clients,
            subscriptions,
        }
    }

    /// Invoke `operation` and broadcast the outcome for `subscription_id`.
    ///
    /// On success the message is cached on the subscription and broadcast
    /// as `api.data`; on failure an `api.error` message is broadcast and
    /// an error line logged. When no subscription exists for the id (a
    /// bare diagnostic call, or a teardown that won the race against an
    /// in-flight call) the message is returned without being broadcast.
    pub async fn execute(
        &self,
        subscription_id: &str,
        operation: &FetchFn,
        params: Option<Value>,
    ) -> BusMessage {
        info!("Calling '{subscription_id}'");
        match operation(params).await {
            Ok(value) => self.settle_success(subscription_id, value).await,
            Err(failure) => self.settle_failure(subscription_id, &failure).await,
        }
    }

    /// Success path for push-mode deliveries, fed by [`crate::Reporter`].
    pub(crate) async fn report(&self, subscription_id: &str, value: Value) -> BusMessage {
        self.settle_success(subscription_id, value).await
    }

    async fn settle_success(&self, subscription_id: &str, value: Value) -> BusMessage {
        let message = BusMessage::new(subscription_id, value);
        // The subscription may have been torn down while the call was in
        // flight; in that case the outcome is returned, not broadcast.
        if self.subscriptions.set_cached(subscription_id, message.clone()).await {
            self.broadcast(subscription_id, API_DATA, &message).await;
        }
        message
    }

    async fn settle_failure(&self, subscription_id: &str, failure: &CallFailure) -> BusMessage {
        let provider_id = subscription_id.split('.').next().unwrap_or(subscription_id);
        error!(
            "[{provider_id}] {subscription_id} - status code: {}",
            failure.status
        );

        let message = BusMessage::new(subscription_id, json!({ "message": failure.message }));
        if self.subscriptions.contains(subscription_id).await {
            self.broadcast(subscription_id, API_ERROR, &message).await;
        }
        message
    }

    /// Deliver `message` to the subscription's client set, read now, after
    /// the call resolved, so late joiners receive the value and a deleted
    /// subscription is a silent no-op.
    async fn broadcast(&self, subscription_id: &str, event: &str, message: &BusMessage) {
        let Some(client_ids) = self.subscriptions.clients_of(subscription_id).await else {
            return;
        };

        for client_id in client_ids {
            let Some(handle) = self.clients.get(&client_id).await else {
                continue;
            };
            if let Err(err) = handle.send(event, message) {
                warn!("{err}");
            }
        }
    }
}
