//! Subscription Broker
//!
//! The broker owns the provider and client registries and the
//! subscription table, and coordinates the lifecycle of every
//! subscription: creation and de-duplication, the initial fetch, poll
//! scheduling, push registration and teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{ClientHandle, ClientRegistry};
use crate::error::{Error, Result};
use crate::executor::CallExecutor;
use crate::message::{BusMessage, SubscriptionRequest, POLL_INTERVAL};
use crate::provider::{DeliveryMode, FetchFn, Operation, ProviderFactory, ProviderRegistry};
use crate::subscription::{JoinOutcome, SubscriptionInfo, SubscriptionTable};

/// Delivery callback handed to push-mode operations at subscribe time.
///
/// Bound to a single subscription id. Each reported value is queued to
/// the subscription's feed task and routed through the call executor's
/// success path, so it is cached and broadcast exactly like a poll
/// result. Reporting after the subscription is gone is a silent no-op.
#[derive(Clone)]
pub struct Reporter {
    subscription_id: String,
    tx: mpsc::UnboundedSender<Value>,
}

impl Reporter {
    /// Queue `value` for broadcast on this reporter's subscription.
    pub fn report(&self, value: Value) {
        if self.tx.send(value).is_err() {
            debug!(
                "Dropping report for '{}', subscription is gone",
                self.subscription_id
            );
        }
    }

    /// Subscription id this reporter delivers to.
    #[must_use]
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }
}

/// The subscription broker.
///
/// Cheaply clonable; clones share the same registries and table, so a
/// clone works as the provider-facing handle required by factories.
#[derive(Clone)]
pub struct Broker {
    providers: ProviderRegistry,
    clients: ClientRegistry,
    subscriptions: SubscriptionTable,
    executor: CallExecutor,
}

impl Broker {
    /// Create a broker with empty registries.
    #[must_use]
    pub fn new() -> Self {
        let clients = ClientRegistry::new();
        let subscriptions = SubscriptionTable::new();
        let executor = CallExecutor::new(clients.clone(), subscriptions.clone());
        Self {
            providers: ProviderRegistry::new(),
            clients,
            subscriptions,
            executor,
        }
    }

    /// Register a provider under `id` with the given delivery mode.
    ///
    /// Providers are registered once at startup and live for the process
    /// lifetime.
    pub async fn register_provider(
        &self,
        id: impl Into<String>,
        factory: ProviderFactory,
        mode: DeliveryMode,
    ) -> Result<()> {
        self.providers.register(id, factory, mode).await
    }

    /// Register a connected client's send-handle under `id`.
    pub async fn add_client(
        &self,
        id: impl Into<String>,
        handle: Arc<dyn ClientHandle>,
    ) -> Result<()> {
        self.clients.add(id, handle).await
    }

    /// Remove a disconnected client, dropping it from every subscription
    /// it belongs to with the same cleanup as an explicit unsubscribe.
    pub async fn remove_client(&self, client_id: &str) {
        for subscription_id in self.subscriptions.subscriptions_of(client_id).await {
            if self.subscriptions.remove_client(&subscription_id, client_id).await == Some(true) {
                debug!("Removed empty subscription '{subscription_id}'");
            }
        }
        self.clients.remove(client_id).await;
    }

    /// Subscribe `client_id` to the operation named by `request.id`.
    ///
    /// A request from an unknown client is logged and ignored. Malformed
    /// ids and unresolvable operations are integration errors: they are
    /// logged and returned to the caller. Joining an existing
    /// subscription never re-invokes the operation and never creates a
    /// second timer.
    pub async fn subscribe(&self, client_id: &str, request: SubscriptionRequest) -> Result<()> {
        if !self.clients.contains(client_id).await {
            error!("Unable to find a client with id '{client_id}'");
            return Ok(());
        }

        let subscription_id = request.id;
        let Some((provider_id, operation_name)) = subscription_id.split_once('.') else {
            let err = Error::InvalidSubscriptionId(subscription_id);
            error!("{err}");
            return Err(err);
        };

        let (operations, mode) = self.providers.resolve(provider_id, self.clone()).await?;
        let Some(operation) = operations.get(operation_name).cloned() else {
            let err = Error::UnknownOperation(operation_name.to_string());
            error!("{err}");
            return Err(err);
        };

        if !operation.matches(mode) {
            let err = Error::NotCallable {
                id: subscription_id,
                mode,
            };
            error!("{err}");
            return Err(err);
        }

        let outcome = self
            .subscriptions
            .join_or_create(&subscription_id, client_id, request.params.clone())
            .await;
        let in_flight = match outcome {
            // Already active: the client only joins the broadcast group.
            JoinOutcome::Joined => return Ok(()),
            JoinOutcome::Created(in_flight) => in_flight,
        };
        info!("Added subscription '{subscription_id}'");

        match operation {
            Operation::Stream(setup) => {
                info!("Creating producer for '{subscription_id}'");
                let reporter = self.spawn_feed(&subscription_id).await;
                setup(request.params, reporter);
            }
            Operation::Fetch(fetch) => {
                self.executor
                    .execute(&subscription_id, &fetch, request.params.clone())
                    .await;
                self.spawn_scheduler(subscription_id, fetch, request.params, in_flight)
                    .await;
            }
        }

        Ok(())
    }

    /// Drop `client_id`'s interest in `subscription_id`.
    ///
    /// Unknown clients and unknown subscriptions arise from benign races
    /// (duplicate disconnects, stale unsubscribes) and are absorbed with
    /// a warning.
    pub async fn unsubscribe(&self, client_id: &str, subscription_id: &str) {
        if !self.clients.contains(client_id).await {
            warn!(
                "unable to unsubscribe from '{subscription_id}', \
                 client with id '{client_id}' does not exist"
            );
            return;
        }

        match self.subscriptions.remove_client(subscription_id, client_id).await {
            None => {
                warn!("unable to unsubscribe from '{subscription_id}', subscription does not exist");
            }
            Some(true) => debug!("Removed empty subscription '{subscription_id}'"),
            Some(false) => {}
        }
    }

    /// Run a provider operation outside the subscription lifecycle.
    ///
    /// This is the provider-facing execute access: the outcome is built
    /// and returned, and broadcast only if a subscription for the id
    /// happens to exist.
    pub async fn process_call(
        &self,
        subscription_id: &str,
        operation: &FetchFn,
        params: Option<Value>,
    ) -> BusMessage {
        self.executor.execute(subscription_id, operation, params).await
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.count().await
    }

    /// Ids of all connected clients.
    pub async fn client_ids(&self) -> Vec<String> {
        self.clients.ids().await
    }

    /// Ids of all registered providers.
    pub async fn provider_ids(&self) -> Vec<String> {
        self.providers.ids().await
    }

    /// Introspection snapshot of every active subscription.
    pub async fn list_subscriptions(&self) -> HashMap<String, SubscriptionInfo> {
        self.subscriptions.snapshot().await
    }

    /// Tear down every subscription, aborting all poll tickers and push
    /// feeds. Used on server shutdown.
    pub async fn shutdown(&self) {
        self.subscriptions.clear().await;
        debug!("Broker shut down, all subscriptions dropped");
    }

    /// Spawn the forwarder task draining a push subscription's reporter
    /// channel into the executor's success path.
    async fn spawn_feed(&self, subscription_id: &str) -> Reporter {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = self.executor.clone();
        let id = subscription_id.to_string();
        let feed = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                executor.report(&id, value).await;
            }
        });

        self.subscriptions.attach_feed(subscription_id, feed).await;
        Reporter {
            subscription_id: subscription_id.to_string(),
            tx,
        }
    }

    /// Spawn the recurring poll ticker for a newly created subscription.
    ///
    /// Each tick runs on its own task; a tick whose predecessor is still
    /// in flight is skipped instead of overlapping it.
    async fn spawn_scheduler(
        &self,
        subscription_id: String,
        fetch: FetchFn,
        params: Option<Value>,
        in_flight: Arc<AtomicBool>,
    ) {
        info!("Creating scheduler for subscription '{subscription_id}'");
        let executor = self.executor.clone();
        let id = subscription_id.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately; the
            // initial fetch already ran, so consume it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if in_flight.swap(true, Ordering::SeqCst) {
                    debug!("Skipping tick for '{id}', previous call still in flight");
                    continue;
                }

                let executor = executor.clone();
                let fetch = fetch.clone();
                let params = params.clone();
                let id = id.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    executor.execute(&id, &fetch, params).await;
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
        });

        self.subscriptions.attach_timer(&subscription_id, timer).await;
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OperationSet;
    use crate::test_support::RecordingHandle;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn poll_factory(calls: Arc<AtomicUsize>) -> ProviderFactory {
        Arc::new(move |_broker| {
            let calls = calls.clone();
            OperationSet::new().with(
                "fetch",
                Operation::fetch(move |_params| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!("test")) }
                }),
            )
        })
    }

    async fn broker_with_client(client_id: &str) -> (Broker, Arc<RecordingHandle>) {
        let broker = Broker::new();
        let handle = Arc::new(RecordingHandle::new());
        broker.add_client(client_id, handle.clone()).await.unwrap();
        (broker, handle)
    }

    #[tokio::test]
    async fn test_subscribe_unknown_client_is_ignored() {
        let broker = Broker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls.clone()), DeliveryMode::Poll)
            .await
            .unwrap();

        broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.fetch"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(broker.list_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_id() {
        let (broker, _handle) = broker_with_client("test_client").await;
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls), DeliveryMode::Poll)
            .await
            .unwrap();

        let err = broker
            .subscribe("test_client", SubscriptionRequest::new("test_api"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid subscription id 'test_api', should be something like 'provider.operation'"
        );
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_provider() {
        let (broker, _handle) = broker_with_client("test_client").await;

        let err = broker
            .subscribe(
                "test_client",
                SubscriptionRequest::new("invalid_api.invalid_method"),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find provider matching id 'invalid_api'"
        );
    }

    #[tokio::test]
    async fn test_subscribe_rejects_unknown_operation() {
        let (broker, _handle) = broker_with_client("test_client").await;
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls), DeliveryMode::Poll)
            .await
            .unwrap();

        let err = broker
            .subscribe(
                "test_client",
                SubscriptionRequest::new("test_api.invalid_method"),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find operation matching 'invalid_method'"
        );
    }

    #[tokio::test]
    async fn test_subscribe_rejects_mode_mismatch() {
        let (broker, _handle) = broker_with_client("test_client").await;
        // A stream operation on a poll-mode provider is not invocable.
        broker
            .register_provider(
                "test_api",
                Arc::new(|_broker| {
                    OperationSet::new().with("feed", Operation::stream(|_params, _reporter| {}))
                }),
                DeliveryMode::Poll,
            )
            .await
            .unwrap();

        let err = broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.feed"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_callable");
    }

    #[tokio::test]
    async fn test_subscribe_invokes_operation_immediately() {
        let (broker, handle) = broker_with_client("test_client").await;
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls.clone()), DeliveryMode::Poll)
            .await
            .unwrap();

        broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.fetch"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            handle.events(),
            vec![(
                "api.data".to_string(),
                BusMessage::new("test_api.fetch", json!("test")),
            )]
        );
    }

    #[tokio::test]
    async fn test_second_subscriber_joins_without_reinvoking() {
        let (broker, _handle) = broker_with_client("client_a").await;
        broker
            .add_client("client_b", Arc::new(RecordingHandle::new()))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls.clone()), DeliveryMode::Poll)
            .await
            .unwrap();

        broker
            .subscribe("client_a", SubscriptionRequest::new("test_api.fetch"))
            .await
            .unwrap();
        broker
            .subscribe("client_b", SubscriptionRequest::new("test_api.fetch"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let subscriptions = broker.list_subscriptions().await;
        assert_eq!(
            subscriptions["test_api.fetch"].clients,
            vec!["client_a".to_string(), "client_b".to_string()]
        );
        assert!(subscriptions["test_api.fetch"].has_timer);
    }

    #[tokio::test]
    async fn test_subscribe_same_client_twice_is_idempotent() {
        let (broker, _handle) = broker_with_client("test_client").await;
        broker
            .register_provider(
                "test_api",
                Arc::new(|_broker| {
                    OperationSet::new().with("push", Operation::stream(|_params, _reporter| {}))
                }),
                DeliveryMode::Push,
            )
            .await
            .unwrap();

        broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.push"))
            .await
            .unwrap();
        broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.push"))
            .await
            .unwrap();

        let subscriptions = broker.list_subscriptions().await;
        assert_eq!(
            subscriptions["test_api.push"].clients,
            vec!["test_client".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_client_is_absorbed() {
        let broker = Broker::new();
        // Neither call may panic or touch any state.
        broker.unsubscribe("invalid", "invalid").await;

        let (broker, _handle) = broker_with_client("test_client").await;
        broker.unsubscribe("test_client", "invalid").await;
        assert_eq!(broker.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_subscriptions() {
        let (broker, _handle) = broker_with_client("test_client").await;
        let calls = Arc::new(AtomicUsize::new(0));
        broker
            .register_provider("test_api", poll_factory(calls), DeliveryMode::Poll)
            .await
            .unwrap();
        broker
            .subscribe("test_client", SubscriptionRequest::new("test_api.fetch"))
            .await
            .unwrap();

        broker.shutdown().await;
        assert!(broker.list_subscriptions().await.is_empty());
        assert_eq!(broker.client_count().await, 1);
    }
}
