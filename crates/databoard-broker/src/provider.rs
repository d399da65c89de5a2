//! Provider Registry
//!
//! Providers are named sources of data. Each one is registered once with
//! a delivery mode and a factory producing its operation set; the factory
//! runs on every subscribe call so providers get a fresh instance per
//! subscription unless they choose to close over shared state.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::broker::{Broker, Reporter};
use crate::error::{Error, Result};
use crate::message::CallFailure;

/// How a provider delivers updates for its operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The broker re-invokes the operation on a fixed interval.
    Poll,
    /// The provider decides when to deliver, via a [`Reporter`] captured
    /// at subscribe time.
    Push,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Push => write!(f, "push"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "poll" => Ok(Self::Poll),
            "push" => Ok(Self::Push),
            other => {
                let err = Error::InvalidMode(other.to_string());
                error!("{err}");
                Err(err)
            }
        }
    }
}

/// Future returned by fetch operations.
///
/// Boxing the future normalizes synchronous and asynchronous providers:
/// an immediately-ready value and a deferred one run through the call
/// executor identically.
pub type OperationFuture = BoxFuture<'static, std::result::Result<Value, CallFailure>>;

/// A poll-style fetch operation, invoked with the subscription parameters
/// on the initial call and on every subsequent tick.
pub type FetchFn = Arc<dyn Fn(Option<Value>) -> OperationFuture + Send + Sync>;

/// A push-style setup operation, invoked once per subscription with the
/// parameters and the delivery callback the provider drives.
pub type PushFn = Arc<dyn Fn(Option<Value>, Reporter) + Send + Sync>;

/// A named, invocable member of a provider's operation set.
#[derive(Clone)]
pub enum Operation {
    /// Re-invoked by the broker's scheduler (poll mode).
    Fetch(FetchFn),
    /// Invoked once to hand the provider its reporter (push mode).
    Stream(PushFn),
}

impl Operation {
    /// Build a fetch operation from a closure returning a future.
    pub fn fetch<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, CallFailure>> + Send + 'static,
    {
        Self::Fetch(Arc::new(move |params| Box::pin(f(params))))
    }

    /// Build a push setup operation from a closure.
    pub fn stream<F>(f: F) -> Self
    where
        F: Fn(Option<Value>, Reporter) + Send + Sync + 'static,
    {
        Self::Stream(Arc::new(f))
    }

    /// Whether this operation can be driven by the given delivery mode.
    #[must_use]
    pub fn matches(&self, mode: DeliveryMode) -> bool {
        matches!(
            (self, mode),
            (Self::Fetch(_), DeliveryMode::Poll) | (Self::Stream(_), DeliveryMode::Push)
        )
    }
}

/// The operations a provider exposes, keyed by name.
#[derive(Clone, Default)]
pub struct OperationSet {
    operations: HashMap<String, Operation>,
}

impl OperationSet {
    /// Create an empty operation set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, operation: Operation) -> Self {
        self.operations.insert(name.into(), operation);
        self
    }

    /// Look up an operation by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    /// Names of all operations in the set.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }
}

impl std::fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSet")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a provider's operation set, handed a broker handle.
pub type ProviderFactory = Arc<dyn Fn(Broker) -> OperationSet + Send + Sync>;

struct ProviderEntry {
    mode: DeliveryMode,
    factory: ProviderFactory,
}

/// Registry of data providers keyed by identifier.
///
/// Entries are immutable once registered and live for the process
/// lifetime; there is no deregistration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, ProviderEntry>>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `id` with the given delivery mode.
    pub async fn register(
        &self,
        id: impl Into<String>,
        factory: ProviderFactory,
        mode: DeliveryMode,
    ) -> Result<()> {
        let id = id.into();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&id) {
            let err = Error::ProviderAlreadyRegistered(id);
            error!("{err}");
            return Err(err);
        }

        info!("Registered provider '{id}' (mode: {mode})");
        providers.insert(id, ProviderEntry { mode, factory });
        Ok(())
    }

    /// Invoke the stored factory and return the operation set along with
    /// the provider's delivery mode.
    pub async fn resolve(&self, id: &str, broker: Broker) -> Result<(OperationSet, DeliveryMode)> {
        // Copy the entry out before invoking the factory; factories are
        // arbitrary code and must not run under the registry lock.
        let (factory, mode) = {
            let providers = self.providers.read().await;
            let entry = providers.get(id).ok_or_else(|| {
                let err = Error::UnknownProvider(id.to_string());
                error!("{err}");
                err
            })?;
            (entry.factory.clone(), entry.mode)
        };

        Ok((factory(broker), mode))
    }

    /// Ids of all registered providers.
    pub async fn ids(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_factory() -> ProviderFactory {
        Arc::new(|_broker| OperationSet::new())
    }

    #[test]
    fn test_delivery_mode_from_str() {
        assert_eq!("poll".parse::<DeliveryMode>().unwrap(), DeliveryMode::Poll);
        assert_eq!("push".parse::<DeliveryMode>().unwrap(), DeliveryMode::Push);

        let err = "invalid".parse::<DeliveryMode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Delivery mode 'invalid' is not a valid mode, must be one of 'poll' or 'push'"
        );
    }

    #[test]
    fn test_delivery_mode_display() {
        assert_eq!(DeliveryMode::Poll.to_string(), "poll");
        assert_eq!(DeliveryMode::Push.to_string(), "push");
    }

    #[test]
    fn test_operation_matches_mode() {
        let fetch = Operation::fetch(|_params| async { Ok(json!(1)) });
        assert!(fetch.matches(DeliveryMode::Poll));
        assert!(!fetch.matches(DeliveryMode::Push));

        let stream = Operation::stream(|_params, _reporter| {});
        assert!(stream.matches(DeliveryMode::Push));
        assert!(!stream.matches(DeliveryMode::Poll));
    }

    #[test]
    fn test_operation_set_lookup() {
        let set = OperationSet::new()
            .with("status", Operation::fetch(|_params| async { Ok(json!(1)) }));

        assert!(set.get("status").is_some());
        assert!(set.get("missing").is_none());
        assert_eq!(set.names(), vec!["status".to_string()]);
    }

    #[tokio::test]
    async fn test_register_makes_provider_available() {
        let registry = ProviderRegistry::new();
        registry
            .register("test_api", noop_factory(), DeliveryMode::Poll)
            .await
            .unwrap();

        assert_eq!(registry.ids().await, vec!["test_api".to_string()]);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let registry = ProviderRegistry::new();
        let first: ProviderFactory = Arc::new(|_broker| {
            OperationSet::new().with("original", Operation::fetch(|_p| async { Ok(json!(1)) }))
        });
        registry
            .register("test_api", first, DeliveryMode::Poll)
            .await
            .unwrap();

        let err = registry
            .register("test_api", noop_factory(), DeliveryMode::Push)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Provider 'test_api' already registered");

        // The first registration is untouched.
        let (operations, mode) = registry
            .resolve("test_api", Broker::new())
            .await
            .unwrap();
        assert_eq!(mode, DeliveryMode::Poll);
        assert!(operations.get("original").is_some());
    }

    #[tokio::test]
    async fn test_resolve_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry
            .resolve("invalid_api", Broker::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to find provider matching id 'invalid_api'"
        );
    }
}
