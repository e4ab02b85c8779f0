//! WebSocket transport: one JSON frame per text message.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::wire::handler::{FrameTransport, run_session};

/// WebSocket wrapper speaking the frame protocol over text messages.
pub struct WsTransport {
    socket: WebSocket,
}

#[async_trait::async_trait]
impl FrameTransport for WsTransport {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.recv().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(_)) => return None,
                // Binary payloads are not part of the protocol; audio
                // travels base64-encoded inside JSON frames.
                Ok(WsMessage::Binary(_)) => {
                    return Some(Err(PipelineError::Protocol(
                        "binary frames are not supported".into(),
                    )));
                }
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(PipelineError::Channel(format!("websocket error: {e}"))));
                }
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<()> {
        self.socket
            .send(WsMessage::Text(frame.to_owned().into()))
            .await
            .map_err(|e| PipelineError::Channel(format!("websocket send failed: {e}")))
    }
}

/// Build a router exposing the session endpoint at `/ws`.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/ws", get(upgrade_handler))
        .with_state(pipeline)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(pipeline): State<Arc<Pipeline>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, pipeline))
}

async fn handle_socket(socket: WebSocket, pipeline: Arc<Pipeline>) {
    info!("websocket client connected");
    let transport = WsTransport { socket };
    if let Err(e) = run_session(pipeline, transport).await {
        warn!("session ended with transport error: {e}");
    }
    info!("websocket client disconnected");
}
