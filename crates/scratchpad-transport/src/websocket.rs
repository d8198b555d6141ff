//! WebSocket transport for panel views.
//!
//! Each connection is one "open" request: it reveals the live panel (or
//! creates one), replays the panel's outbound history and then streams live
//! envelopes. Closing the last connection disposes the panel.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};

use crate::panel::PanelRegistry;

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub registry: PanelRegistry,
}

impl WsState {
    #[must_use]
    pub const fn new(registry: PanelRegistry) -> Self {
        Self { registry }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (panel, outcome) = match state.registry.open().await {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!("Failed to open panel: {e}");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let view = panel.attach_view();
    tracing::info!(panel = %panel.id(), ?outcome, "view connected");

    // Forward outbound envelopes to the WebSocket until the panel closes.
    let mut outbound = panel.subscribe();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound.next().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        if panel.post_message(text).is_err() {
            tracing::debug!(panel = %panel.id(), "panel disposed, closing view");
            break;
        }
    }

    drop(view);
    send_task.abort();
    tracing::info!(panel = %panel.id(), "view disconnected");
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(registry));
/// ```
#[must_use]
pub fn create_ws_router(registry: PanelRegistry) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState::new(registry))
}
