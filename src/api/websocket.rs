use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handlers::AppState;
use crate::learning::LearningEvent;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Connected { client_id: String },
    Learning(LearningEvent),
    Error { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let events = state.learning.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<LearningEvent>) {
    let client_id = Uuid::new_v4().to_string();
    info!("New WebSocket connection: {}", client_id);

    let (mut sender, mut receiver) = socket.split();

    let connect_msg = WsMessage::Connected {
        client_id: client_id.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&connect_msg) {
        let _ = sender.send(Message::Text(msg)).await;
    }

    // Learning events out to the client
    let send_client_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(event) => WsMessage::Learning(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, {} events dropped", send_client_id, skipped);
                    WsMessage::Error {
                        message: format!("{} events dropped", skipped),
                    }
                }
                Err(RecvError::Closed) => break,
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Client messages in
    let recv_client_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => debug!("Received ping from client {}", recv_client_id),
                    Err(e) => debug!("Ignoring message from {}: {}", recv_client_id, e),
                },
                Message::Close(_) => {
                    info!("Client {} disconnected", recv_client_id);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket connection closed: {}", client_id);
}
