//! WebSocket Transport Adapter
//!
//! Wires inbound connection, disconnect, subscribe and unsubscribe
//! events to the broker's public operations. Each connection gets a
//! generated client id, a send-handle backed by an outbound channel and
//! a writer task draining that channel into the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::Extension;
use databoard_broker::{Broker, BusMessage, ClientHandle, Error, SubscriptionRequest};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames accepted from remote clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientFrame {
    /// Request to join a subscription.
    #[serde(rename = "api.subscription")]
    Subscription(SubscriptionRequest),

    /// Request to leave a subscription.
    #[serde(rename = "api.unsubscription")]
    Unsubscription(UnsubscriptionRequest),
}

/// Payload of an `api.unsubscription` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscriptionRequest {
    /// Subscription id to leave.
    pub id: String,
}

/// Frame delivered to remote clients.
#[derive(Debug, Serialize)]
struct ServerFrame<'a> {
    event: &'a str,
    payload: &'a BusMessage,
}

/// Send-handle delivering broker events through the connection's writer
/// task.
struct WsClientHandle {
    client_id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle for WsClientHandle {
    fn send(&self, event: &str, message: &BusMessage) -> databoard_broker::Result<()> {
        let send_failed = || Error::SendFailed {
            client: self.client_id.clone(),
            event: event.to_string(),
        };

        let frame = serde_json::to_string(&ServerFrame {
            event,
            payload: message,
        })
        .map_err(|_| send_failed())?;

        self.tx.send(frame).map_err(|_| send_failed())
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(broker): Extension<Broker>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

/// Drive one client connection for its lifetime.
async fn handle_socket(socket: WebSocket, broker: Broker) {
    let client_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let handle = WsClientHandle {
        client_id: client_id.clone(),
        tx,
    };
    if let Err(err) = broker.add_client(&client_id, Arc::new(handle)).await {
        warn!("Rejecting connection: {err}");
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_frame(&broker, &client_id, &text).await,
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by client #{client_id}");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("WebSocket error for client #{client_id}: {err}");
                break;
            }
        }
    }

    writer.abort();
    broker.remove_client(&client_id).await;
}

/// Route one inbound frame to the broker.
///
/// Integration errors stay server-side; the remote client only ever
/// observes `api.data` and `api.error` events.
async fn handle_frame(broker: &Broker, client_id: &str, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscription(request)) => {
            if let Err(err) = broker.subscribe(client_id, request).await {
                debug!("Rejected subscription from client #{client_id}: {err}");
            }
        }
        Ok(ClientFrame::Unsubscription(request)) => {
            broker.unsubscribe(client_id, &request.id).await;
        }
        Err(err) => {
            warn!("Discarding invalid frame from client #{client_id}: {err}");
        }
    }
}
