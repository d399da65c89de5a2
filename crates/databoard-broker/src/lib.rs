//! Databoard Broker - Subscription Broker Core
//!
//! This crate provides the subscription broker for databoard:
//! - Provider: provider registry, delivery modes and operation sets
//! - Client: client registry and the opaque send-handle trait
//! - Subscription: the subscription table and lifecycle state
//! - Executor: call execution, outcome normalization and fan-out
//! - Broker: subscribe/unsubscribe semantics, poll scheduling and push
//!   registration
//! - Message: broadcast payloads, event names and the poll interval
//! - Error: error types for broker operations
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use databoard_broker::{Broker, DeliveryMode, Operation, OperationSet, SubscriptionRequest};
//! use serde_json::json;
//!
//! let broker = Broker::new();
//! broker
//!     .register_provider(
//!         "core",
//!         Arc::new(|_broker| {
//!             OperationSet::new()
//!                 .with("status", Operation::fetch(|_params| async { Ok(json!({ "up": true })) }))
//!         }),
//!         DeliveryMode::Poll,
//!     )
//!     .await?;
//!
//! broker.add_client("client", handle).await?;
//! broker.subscribe("client", SubscriptionRequest::new("core.status")).await?;
//! ```
//!
//! Clients attached to the same subscription id share one poll timer and
//! receive every broadcast; the last client leaving tears the
//! subscription down and cancels its timer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod client;
pub mod error;
pub mod executor;
pub mod message;
pub mod provider;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use broker::{Broker, Reporter};
pub use client::{ClientHandle, ClientRegistry};
pub use error::{Error, Result};
pub use executor::CallExecutor;
pub use message::{
    BusMessage, CallFailure, SubscriptionRequest, API_DATA, API_ERROR, API_SUBSCRIPTION,
    API_UNSUBSCRIPTION, POLL_INTERVAL,
};
pub use provider::{
    DeliveryMode, FetchFn, Operation, OperationFuture, OperationSet, ProviderFactory,
    ProviderRegistry, PushFn,
};
pub use subscription::SubscriptionInfo;
