//! Client Registry
//!
//! Connected clients are tracked by identifier with an opaque
//! send-handle. The broker never inspects a handle beyond calling
//! [`ClientHandle::send`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::message::BusMessage;

/// Opaque capability for delivering a named event to one remote endpoint.
///
/// Delivery is best-effort: failures are reported to the caller, which
/// logs them, and are never retried.
pub trait ClientHandle: Send + Sync {
    /// Deliver `message` under `event` to the remote endpoint.
    fn send(&self, event: &str, message: &BusMessage) -> Result<()>;
}

/// Registry of connected clients keyed by identifier.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Arc<dyn ClientHandle>>>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected client's send-handle under `id`.
    pub async fn add(&self, id: impl Into<String>, handle: Arc<dyn ClientHandle>) -> Result<()> {
        let id = id.into();
        let mut clients = self.clients.write().await;
        if clients.contains_key(&id) {
            let err = Error::DuplicateClient(id);
            error!("{err}");
            return Err(err);
        }

        info!("Client #{id} connected");
        clients.insert(id, handle);
        Ok(())
    }

    /// Remove a client if present. Removing an absent id is a no-op at
    /// this layer; the subscription manager owns any warning.
    pub async fn remove(&self, id: &str) {
        if self.clients.write().await.remove(id).is_some() {
            info!("Client #{id} disconnected");
        }
    }

    /// Whether a client is registered under `id`.
    pub async fn contains(&self, id: &str) -> bool {
        self.clients.read().await.contains_key(id)
    }

    /// Look up a client's send-handle.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn ClientHandle>> {
        self.clients.read().await.get(id).cloned()
    }

    /// Number of connected clients.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Ids of all connected clients.
    pub async fn ids(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Snapshot of all connected clients and their handles.
    pub async fn list(&self) -> HashMap<String, Arc<dyn ClientHandle>> {
        self.clients.read().await.clone()
    }
}
