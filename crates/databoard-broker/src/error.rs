//! Error types for databoard-broker
//!
//! Integration errors raised by the registries and the subscription
//! manager. Provider execution failures are not represented here; they
//! are absorbed by the call executor and broadcast as `api.error`.

use thiserror::Error;

use crate::provider::DeliveryMode;

/// Broker error type
#[derive(Debug, Error)]
pub enum Error {
    /// A provider id was registered twice
    #[error("Provider '{0}' already registered")]
    ProviderAlreadyRegistered(String),

    /// A delivery mode string did not name a valid mode
    #[error("Delivery mode '{0}' is not a valid mode, must be one of 'poll' or 'push'")]
    InvalidMode(String),

    /// A client id was registered twice
    #[error("Client with id '{0}' already exists")]
    DuplicateClient(String),

    /// No provider is registered under the requested id
    #[error("Unable to find provider matching id '{0}'")]
    UnknownProvider(String),

    /// A subscription id is missing the `provider.operation` separator
    #[error("Invalid subscription id '{0}', should be something like 'provider.operation'")]
    InvalidSubscriptionId(String),

    /// The resolved provider has no operation under the requested name
    #[error("Unable to find operation matching '{0}'")]
    UnknownOperation(String),

    /// The operation exists but cannot be driven by the provider's mode
    #[error("Operation '{id}' is not callable in '{mode}' mode")]
    NotCallable {
        /// Subscription id naming the operation
        id: String,
        /// The provider's declared delivery mode
        mode: DeliveryMode,
    },

    /// A send-handle rejected a delivery
    #[error("Failed to deliver '{event}' to client '{client}'")]
    SendFailed {
        /// The client the delivery was addressed to
        client: String,
        /// The event name that failed to deliver
        event: String,
    },
}

impl Error {
    /// Get error code for logs and operational tooling
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProviderAlreadyRegistered(_) => "provider_already_registered",
            Self::InvalidMode(_) => "invalid_mode",
            Self::DuplicateClient(_) => "duplicate_client",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::InvalidSubscriptionId(_) => "invalid_subscription_id",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::NotCallable { .. } => "not_callable",
            Self::SendFailed { .. } => "send_failed",
        }
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, Error>;
