//! WebSocket endpoint: accept connections, decode JSON frames, and route
//! to the query pipeline or the status responder.
//!
//! One task owns each socket, so sends are naturally serialized and a second
//! `query` cannot be processed while the first is still streaming. Protocol
//! errors are answered with an `error` message and the connection stays open.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::query::QueryPipeline;
use crate::state::AppState;

/// Build the router: a single WebSocket endpoint at the root.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(mut socket: WebSocket, state: Arc<AppState>) {
    debug!("client connected");
    while let Some(frame) = socket.recv().await {
        let message = match frame {
            Ok(m) => m,
            Err(_) => break, // client went away
        };
        match message {
            Message::Text(text) => {
                if process_message(&mut socket, &state, &text).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; ignore other frame kinds.
            _ => {}
        }
    }
    debug!("client disconnected");
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).unwrap();
    socket.send(Message::Text(json)).await
}

/// Handle one inbound frame. `Err` means the socket is gone.
async fn process_message(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
    text: &str,
) -> Result<(), axum::Error> {
    let started = Instant::now();

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return send(socket, &ServerMessage::error("Invalid JSON format")).await;
        }
    };

    let message: ClientMessage = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            warn!("rejected message: {e}");
            return send(socket, &ServerMessage::error(format!("Invalid message: {e}"))).await;
        }
    };

    match message {
        ClientMessage::Query { question, index } => {
            if question.trim().is_empty() {
                return send(socket, &ServerMessage::error("Field 'question' cannot be empty"))
                    .await;
            }
            if let Some(requested) = index {
                let loaded = state.snapshot().index_name;
                if requested != loaded {
                    // Kept for forward compatibility with multi-index clients.
                    debug!("ignoring query index '{requested}' (loaded index is '{loaded}')");
                }
            }

            let pipeline = QueryPipeline::new(
                state.manager.clone(),
                state.manager.embedder(),
                state.chat.read().clone(),
                state.query_options,
            );

            let mut chunks = 0usize;
            let mut stream = pipeline.run(question);
            while let Some(msg) = stream.next().await {
                if matches!(msg, ServerMessage::StreamChunk { .. }) {
                    chunks += 1;
                }
                send(socket, &msg).await?;
            }
            info!(
                "request_completed type=query elapsed_ms={:.2} chunks={chunks}",
                started.elapsed().as_secs_f64() * 1000.0
            );
        }
        ClientMessage::Status => {
            let (status, message) = state.status();
            send(
                socket,
                &ServerMessage::Status { status, message: Some(message.to_string()) },
            )
            .await?;
            info!(
                "request_completed type=status elapsed_ms={:.2}",
                started.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}
