//! Streaming LLM client: one WebSocket connection per process, with
//! per-request streams multiplexed over it by request id. The connection is
//! held by a pair of reader/writer tasks; `LlmSession` is the per-request
//! receive half handed to the conductor.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use viva_protocol::{LlmClientMessage, LlmServerFrame, LlmServerMessage, StartRequest};

const OUTBOUND_QUEUE: usize = 64;
const PER_REQUEST_QUEUE: usize = 32;

#[derive(Error, Debug)]
pub enum LlmError {
    /// Connection-level failure; worth one reconnect cycle. Malformed
    /// frames are not errors at this level: the reader logs and skips them
    /// to keep the connection alive.
    #[error("llm service unavailable: {0}")]
    Unavailable(String),
}

type RequestRouter = Arc<Mutex<HashMap<String, mpsc::Sender<LlmServerMessage>>>>;

pub struct LlmClient {
    out_tx: mpsc::Sender<LlmClientMessage>,
    router: RequestRouter,
    closed: CancellationToken,
}

impl LlmClient {
    pub async fn connect(url: &str) -> Result<Arc<Self>, LlmError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<LlmClientMessage>(OUTBOUND_QUEUE);
        let router: RequestRouter = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    msg = out_rx.recv() => {
                        let Some(msg) = msg else { break };
                        let text = match serde_json::to_string(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("failed to encode llm client message: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let reader_router = router.clone();
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<LlmServerFrame>(&text) {
                            Ok(frame) => route_frame(&reader_router, frame).await,
                            Err(e) => debug!("ignoring undecodable llm frame: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("llm stream read error: {}", e);
                        break;
                    }
                }
            }
            // Dropping the per-request senders ends every open session.
            reader_closed.cancel();
            reader_router.lock().clear();
        });

        Ok(Arc::new(Self {
            out_tx,
            router,
            closed,
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Marks the connection broken and releases every open request stream.
    pub fn shutdown(&self) {
        self.closed.cancel();
        self.router.lock().clear();
    }

    /// Opens one per-request stream: registers the request id, then sends
    /// the Start message.
    pub async fn open_session(&self, start: StartRequest) -> Result<LlmSession, LlmError> {
        if self.is_closed() {
            return Err(LlmError::Unavailable("connection closed".into()));
        }
        let request_id = start.request_id.clone();
        let (tx, rx) = mpsc::channel(PER_REQUEST_QUEUE);
        self.router.lock().insert(request_id.clone(), tx);

        if self
            .out_tx
            .send(LlmClientMessage::Start(start))
            .await
            .is_err()
        {
            self.router.lock().remove(&request_id);
            return Err(LlmError::Unavailable("connection writer gone".into()));
        }

        Ok(LlmSession {
            request_id,
            rx,
            out_tx: self.out_tx.clone(),
            router: self.router.clone(),
        })
    }
}

async fn route_frame(router: &RequestRouter, frame: LlmServerFrame) {
    let tx = router.lock().get(&frame.request_id).cloned();
    match tx {
        Some(tx) => {
            if tx.send(frame.msg).await.is_err() {
                router.lock().remove(&frame.request_id);
            }
        }
        None => debug!(request = %frame.request_id, "frame for unknown llm request"),
    }
}

/// Receive half of one in-flight request.
pub struct LlmSession {
    request_id: String,
    rx: mpsc::Receiver<LlmServerMessage>,
    out_tx: mpsc::Sender<LlmClientMessage>,
    router: RequestRouter,
}

impl LlmSession {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns `None` at end of stream, clean or cancelled.
    pub async fn recv(&mut self) -> Option<LlmServerMessage> {
        self.rx.recv().await
    }

    /// Deregisters the request and sends a best-effort Cancel frame; the
    /// request-scope token remains the primary cancellation mechanism.
    pub async fn close(self) {
        self.router.lock().remove(&self.request_id);
        let _ = self
            .out_tx
            .send(LlmClientMessage::Cancel {
                request_id: self.request_id,
            })
            .await;
    }
}
