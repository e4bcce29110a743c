//! Per-turn LLM stream conduction: one task per TranscriptFinal that opens
//! a request stream, forwards each Sentence to the gateway as StartTTS, and
//! always detaches on the way out. Cancellation is checked before every
//! emit so nothing reaches TTS after a barge-in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use viva_protocol::{ChatMessage, CommandEnvelope, LlmServerMessage, OrchestratorCommand, StartRequest};

use crate::gateway::CommandSender;
use crate::llm::client::{LlmError, LlmSession};
use crate::state::AppState;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct TurnRequest {
    pub session_id: String,
    pub text: String,
    /// Turn epoch issued by the transcript handler; presented on
    /// attach/detach so a superseded turn cannot touch newer state.
    pub epoch: u64,
}

pub async fn run_turn(
    state: Arc<AppState>,
    out: CommandSender,
    token: CancellationToken,
    turn: TurnRequest,
) {
    let llm = &state.config.llm;

    let mut messages = Vec::with_capacity(2);
    if !llm.system_prompt.is_empty() {
        messages.push(ChatMessage::system(&llm.system_prompt));
    }
    messages.push(ChatMessage::user(&turn.text));

    let start = StartRequest {
        session_id: turn.session_id.clone(),
        request_id: next_request_id(),
        deployment: llm.deployment.clone(),
        api_version: llm.api_version.clone(),
        messages,
        stream: true,
    };

    let mut session = match open_with_retry(&state, start).await {
        Ok(session) => session,
        Err(e) => {
            // The turn is dropped; the next transcript may succeed.
            warn!(session = %turn.session_id, "llm stream open failed, dropping turn: {}", e);
            return;
        }
    };

    if !state
        .registry
        .attach_llm(&turn.session_id, token.clone(), turn.epoch)
    {
        debug!(session = %turn.session_id, "turn superseded before attach");
        session.close().await;
        return;
    }

    drain_stream(&state, &out, &token, &turn.session_id, &mut session).await;

    // Cleanup always runs: fire the (idempotent) cancel, release the
    // request stream, clear the session's LLM state.
    token.cancel();
    session.close().await;
    state.registry.detach_llm(&turn.session_id, turn.epoch);
}

/// An unavailable connection gets exactly one reconnect cycle and one
/// retry; a second failure drops the turn.
async fn open_with_retry(state: &Arc<AppState>, start: StartRequest) -> Result<LlmSession, LlmError> {
    match try_open(state, start.clone()).await {
        Ok(session) => Ok(session),
        Err(LlmError::Unavailable(reason)) => {
            debug!("llm stream unavailable ({}), reconnect and retry once", reason);
            state.pool.reconnect(1).await?;
            try_open(state, start).await
        }
    }
}

async fn try_open(state: &Arc<AppState>, start: StartRequest) -> Result<LlmSession, LlmError> {
    let client = state.pool.get().await?;
    client.open_session(start).await
}

async fn drain_stream(
    state: &Arc<AppState>,
    out: &CommandSender,
    token: &CancellationToken,
    session_id: &str,
    session: &mut LlmSession,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(session = %session_id, "llm stream cancelled");
                return;
            }
            msg = session.recv() => {
                let Some(msg) = msg else { return };
                match msg {
                    LlmServerMessage::Sentence { text } => {
                        if text.is_empty() {
                            continue;
                        }
                        // A Sentence already buffered when cancel fired must
                        // not become speech.
                        if token.is_cancelled() {
                            return;
                        }
                        observe_first_sentence(state, session_id);
                        out.send(CommandEnvelope::new(
                            session_id,
                            OrchestratorCommand::StartTts { text },
                        ));
                    }
                    LlmServerMessage::Error { code, message } => {
                        warn!(session = %session_id, code, "llm error: {}", message);
                    }
                    LlmServerMessage::Usage { total_tokens, .. } => {
                        debug!(session = %session_id, total_tokens, "llm usage");
                    }
                    LlmServerMessage::Connected { .. }
                    | LlmServerMessage::Token { .. }
                    | LlmServerMessage::Unknown => {}
                }
            }
        }
    }
}

/// First sentence of a response closes the transcript-to-speech latency
/// window; later sentences are not samples.
fn observe_first_sentence(state: &Arc<AppState>, session_id: &str) {
    let now = state.clock.now();
    let latency = state
        .registry
        .with_existing(session_id, |sess| {
            if sess.first_sentence_observed {
                return None;
            }
            sess.first_sentence_observed = true;
            sess.last_final_at
                .map(|at| now.saturating_duration_since(at))
        })
        .flatten();

    if let Some(latency) = latency {
        state
            .metrics
            .llm_first_sentence
            .record(latency.as_millis() as u64);
    }
}

fn next_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", millis, seq)
}
