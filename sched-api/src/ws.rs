//! WebSocket status notifications
//!
//! Protocol:
//! → Client connects to `/ws` with `X-Owner-Id` (or `?owner_id=` for
//!   browsers, which cannot set headers on an upgrade)
//! ← Server sends: {"type":"connected","owner_id":"..."}
//! ← Server sends one frame per status change of the owner's posts:
//!   {"type":"status","post_id":"...","owner_id":"...","status":"published",...}

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use libschedcast::notify::{StatusEvent, Subscription};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::routes::OwnerId;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub owner_id: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = OwnerId::from_headers(&headers)
        .or_else(|| {
            params
                .owner_id
                .filter(|o| !o.trim().is_empty())
                .map(OwnerId)
        })
        .ok_or(ApiError::Unauthorized)?;

    // Subscribe before the upgrade so no event between handshake and first
    // poll is lost
    let subscription = state.service.subscribe(&owner.0);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

fn frame(event: &StatusEvent) -> Option<String> {
    let mut value = serde_json::to_value(event).ok()?;
    value
        .as_object_mut()?
        .insert("type".to_string(), json!("status"));
    Some(value.to_string())
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let owner_id = subscription.owner_id().to_string();
    tracing::info!(owner_id = %owner_id, "WebSocket subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    let hello = json!({ "type": "connected", "owner_id": owner_id }).to_string();
    if sender.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let Some(text) = frame(&event) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Client messages carry nothing we act on
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!(owner_id = %owner_id, "WebSocket subscriber disconnected");
}
