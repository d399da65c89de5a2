//! Shared helpers for broker unit tests.

use std::sync::Mutex;

use crate::client::ClientHandle;
use crate::error::{Error, Result};
use crate::message::BusMessage;
use crate::subscription::Subscription;

/// Send-handle that records every delivered event.
#[derive(Default)]
pub(crate) struct RecordingHandle {
    events: Mutex<Vec<(String, BusMessage)>>,
}

impl RecordingHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<(String, BusMessage)> {
        self.events.lock().unwrap().clone()
    }
}

impl ClientHandle for RecordingHandle {
    fn send(&self, event: &str, message: &BusMessage) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), message.clone()));
        Ok(())
    }
}

/// Send-handle that rejects every delivery.
pub(crate) struct FailingHandle;

impl ClientHandle for FailingHandle {
    fn send(&self, event: &str, _message: &BusMessage) -> Result<()> {
        Err(Error::SendFailed {
            client: "failing".to_string(),
            event: event.to_string(),
        })
    }
}

/// Build a bare subscription entry with the given members.
pub(crate) fn subscription_with_clients(clients: &[&str]) -> Subscription {
    let mut subscription = Subscription::new("placeholder", None);
    subscription.clients = clients.iter().map(|c| c.to_string()).collect();
    subscription
}
