//! WebSocket wiring for the signaling gateway: one receive loop and one
//! send pump per connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::datastore::DataStore;
use crate::forwarder::{ForwarderEvent, ForwarderFactory};
use crate::gateway::SignalingGateway;
use crate::protocol::{self, ServerMessage};

/// Shared state handed to every connection. Config is read-only; the
/// datastore and forwarder factory are internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub datastore: Arc<dyn DataStore>,
    pub forwarders: Arc<dyn ForwarderFactory>,
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    // Single writer per connection: everything outbound goes through this
    // channel, so frames never interleave and a closed socket just ends
    // the pump.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let pump_id = connection_id.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = protocol::encode(&message);
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(connection = %pump_id, "send pump ended");
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ForwarderEvent>();
    let mut gateway = SignalingGateway::new(
        connection_id.clone(),
        state.config,
        state.forwarders,
        state.datastore,
        tx,
        events_tx,
    );
    gateway.on_open();

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => gateway.on_message(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    gateway.on_error(&err);
                    break;
                }
            },
            Some(event) = events_rx.recv() => gateway.on_forwarder_event(event).await,
        }
    }

    gateway.on_close().await;
    debug!(connection = %connection_id, "websocket disconnected");
}
