//! Built-in Providers
//!
//! The `core` provider exposes the server's own vitals, so a freshly
//! wired dashboard has data to render before any custom provider is
//! registered.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use databoard_broker::{Broker, DeliveryMode, Operation, OperationSet, Result};
use serde_json::json;

/// Register the providers shipped with the server binary.
pub async fn register_builtin(broker: &Broker) -> Result<()> {
    let started_at = Instant::now();

    broker
        .register_provider(
            "core",
            Arc::new(move |_broker: Broker| {
                OperationSet::new()
                    .with(
                        "status",
                        Operation::fetch(move |_params| {
                            let uptime_secs = started_at.elapsed().as_secs();
                            async move {
                                Ok(json!({
                                    "uptime_secs": uptime_secs,
                                    "server_time": Utc::now().to_rfc3339(),
                                    "version": env!("CARGO_PKG_VERSION"),
                                }))
                            }
                        }),
                    )
                    .with(
                        "clock",
                        Operation::fetch(|_params| async {
                            Ok(json!({ "now": Utc::now().to_rfc3339() }))
                        }),
                    )
            }),
            DeliveryMode::Poll,
        )
        .await
}
