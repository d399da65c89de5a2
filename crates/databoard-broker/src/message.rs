//! Broker Message Types
//!
//! This module defines the payloads exchanged between the broker and
//! remote clients, along with the fixed event names and poll interval.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Event name for successful data broadcasts.
pub const API_DATA: &str = "api.data";

/// Event name for provider failure broadcasts.
pub const API_ERROR: &str = "api.error";

/// Event name clients use to request a subscription.
pub const API_SUBSCRIPTION: &str = "api.subscription";

/// Event name clients use to drop a subscription.
pub const API_UNSUBSCRIPTION: &str = "api.unsubscription";

/// Interval between re-invocations of a poll-mode subscription's operation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// Message broadcast to every client of a subscription.
///
/// The same shape carries both outcomes: `data` holds the operation's
/// value on `api.data` events and `{"message": ...}` on `api.error`
/// events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Subscription id the message belongs to (`provider.operation`).
    pub id: String,
    /// Operation result, or the failure description.
    pub data: Value,
}

impl BusMessage {
    /// Create a message for a subscription id.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A client's request to subscribe to a provider operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Subscription id, `<provider>.<operation>`.
    pub id: String,
    /// Invocation parameters, fixed for the subscription's lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl SubscriptionRequest {
    /// Create a request without parameters.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: None,
        }
    }

    /// Attach invocation parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Failure reported by a provider operation.
///
/// Never escapes the call executor; it is converted into an `api.error`
/// broadcast carrying `{"message": ...}` and an error log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Provider-defined status code.
    pub status: i64,
    /// Optional human-readable description.
    pub message: Option<String>,
}

impl CallFailure {
    /// Create a failure carrying only a status code.
    #[must_use]
    pub fn new(status: i64) -> Self {
        Self {
            status,
            message: None,
        }
    }

    /// Attach a description to the failure.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
