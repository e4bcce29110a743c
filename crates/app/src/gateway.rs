//! Gateway control-stream endpoint. Each connection gets one reader task
//! that dispatches events strictly in order, plus a writer task draining a
//! bounded outbound mailbox — the single-writer interposition that makes
//! concurrent sends from the event handlers and the LLM reader safe.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viva_protocol::{CommandEnvelope, GatewayEnvelope};

use crate::handlers;
use crate::state::AppState;

const OUTBOUND_MAILBOX: usize = 64;

/// Handle for enqueueing outbound commands. Sends never block: a full
/// mailbox drops the command with a log, per the control-stream contract.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl CommandSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CommandEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, cmd: CommandEnvelope) {
        let kind = cmd.command.kind();
        if let Err(e) = self.tx.try_send(cmd) {
            warn!(kind, "dropping outbound command: {}", e);
        }
    }
}

pub fn control_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/control", get(control_handler))
        .with_state(state)
}

async fn control_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_control_stream(socket, state))
}

pub async fn handle_control_stream(socket: WebSocket, state: Arc<AppState>) {
    info!("gateway control stream connected");
    let (mut sink, mut stream) = socket.split();
    let (out, mut out_rx) = CommandSender::channel(OUTBOUND_MAILBOX);
    let conn = CancellationToken::new();

    let writer = tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            let kind = cmd.command.kind();
            let text = match serde_json::to_string(&cmd) {
                Ok(text) => text,
                Err(e) => {
                    warn!(kind, "failed to encode command: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!(kind, "gateway send failed, treating stream as terminated: {}", e);
                break;
            }
        }
    });

    // Sessions first seen on this stream; torn down when it ends.
    let mut seen = HashSet::new();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<GatewayEnvelope>(&text) {
                Ok(envelope) => {
                    seen.insert(handlers::effective_session_id(&envelope.session_id));
                    handlers::dispatch(&state, &out, &conn, envelope);
                }
                Err(e) => {
                    // Undecodable events are logged and skipped; the stream
                    // itself stays open.
                    debug!("ignoring undecodable gateway event: {}", e);
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("gateway control stream read error: {}", e);
                break;
            }
        }
    }

    conn.cancel();
    for sid in seen {
        state.registry.remove(&sid);
    }
    // LLM readers may still hold sender clones while they unwind; the
    // socket is gone, so the writer does not wait for them.
    writer.abort();
    info!("gateway control stream closed");
}
