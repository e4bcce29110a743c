//! Event dispatch for the gateway control stream. Every mutation of
//! session state originates here (serially, per connection) or in the LLM
//! reader via the registry's helpers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use viva_protocol::{CommandEnvelope, GatewayEnvelope, GatewayEvent, OrchestratorCommand, TtsEventKind};
use viva_telemetry::OrchestratorMetrics;
use viva_vad::FrameDecision;

use crate::bargein::SpeechSource;
use crate::config::VadSource;
use crate::gateway::CommandSender;
use crate::llm::{run_turn, TurnRequest};
use crate::phase::{set_phase, Phase};
use crate::state::AppState;

pub fn effective_session_id(raw: &str) -> String {
    if raw.is_empty() {
        "unknown".to_string()
    } else {
        raw.to_string()
    }
}

pub fn dispatch(
    state: &Arc<AppState>,
    out: &CommandSender,
    conn: &CancellationToken,
    envelope: GatewayEnvelope,
) {
    let sid = effective_session_id(&envelope.session_id);
    let now = state.clock.now();

    match envelope.event {
        GatewayEvent::SessionOpen { room_url } => {
            handle_session_open(state, out, &sid, &room_url, now)
        }
        GatewayEvent::Feature { rms } => handle_feature(state, out, &sid, rms, now),
        GatewayEvent::VadStart { .. } => handle_vad_start(state, out, &sid, now),
        GatewayEvent::VadEnd { .. } => trace!(session = %sid, "gateway vad end"),
        GatewayEvent::Tts {
            kind,
            first_audio_ms,
        } => handle_tts(state, &sid, TtsEventKind::parse(&kind), first_audio_ms, now),
        GatewayEvent::TranscriptInterim { text } => {
            debug!(session = %sid, "interim transcript: {:?}", text)
        }
        GatewayEvent::TranscriptFinal { utterance_id, text } => {
            handle_transcript_final(state, out, conn, &sid, &utterance_id, text)
        }
        GatewayEvent::Error { code, message } => {
            warn!(session = %sid, code, "gateway error: {}", message)
        }
        GatewayEvent::Unknown => {}
    }
}

/// Stages barge-in parameters and enables the mic path. Only the first
/// open of a session does anything; a re-open for a live session must not
/// restage the guard or duplicate the arming commands.
fn handle_session_open(
    state: &Arc<AppState>,
    out: &CommandSender,
    sid: &str,
    room_url: &str,
    now: Instant,
) {
    state.registry.with_session(sid, |sess| {
        if sess.phase != Phase::Idle {
            debug!(session = %sid, "session re-open ignored");
            return;
        }
        info!(session = %sid, room = %room_url, "session open");

        // Threshold staged now; the real guard window arrives with TTS
        // first audio.
        sess.detector
            .stage_guard(state.config.min_rms as f64, now);

        out.send(CommandEnvelope::new(
            sid,
            OrchestratorCommand::ArmBargeIn {
                guard_ms: state.config.guard_ms,
                min_rms: state.config.min_rms,
            },
        ));
        out.send(CommandEnvelope::new(sid, OrchestratorCommand::StartMicToStt));

        set_phase(sess, Phase::Listening, &state.metrics);
    });
}

fn handle_feature(state: &Arc<AppState>, out: &CommandSender, sid: &str, rms: f64, now: Instant) {
    OrchestratorMetrics::inc(&state.metrics.vad_features);

    match state.config.vad_source {
        VadSource::Feature => {
            state
                .registry
                .with_session(sid, |sess| match sess.detector.on_frame(rms, now) {
                    FrameDecision::GuardBlocked => {
                        OrchestratorMetrics::inc(&state.metrics.guard_blocks);
                        debug!(session = %sid, rms, "guard blocked above-threshold frame");
                    }
                    FrameDecision::SpeechStart => {
                        OrchestratorMetrics::inc(&state.metrics.vad_starts);
                        sess.last_feature_start = Some(now);
                        if let Some(gateway_start) = sess.last_gateway_start {
                            if let Some(delta) = now.checked_duration_since(gateway_start) {
                                state
                                    .metrics
                                    .vad_agree_gateway
                                    .record(delta.as_millis() as u64);
                            }
                        }
                        state
                            .bargein
                            .on_speech_start(sess, SpeechSource::Feature, now, out);
                    }
                    FrameDecision::SpeechEnd => {
                        OrchestratorMetrics::inc(&state.metrics.vad_ends);
                        sess.last_feature_start = None;
                        sess.last_gateway_start = None;
                    }
                    FrameDecision::NoChange => {}
                });
        }
        VadSource::Gateway => {
            // Secondary source: remember only the first loud frame of the
            // utterance for agreement timing.
            state.registry.with_session(sid, |sess| {
                if sess.detector.is_above_threshold(rms) && sess.last_feature_start.is_none() {
                    sess.last_feature_start = Some(now);
                }
            });
        }
    }
}

fn handle_vad_start(state: &Arc<AppState>, out: &CommandSender, sid: &str, now: Instant) {
    state.registry.with_session(sid, |sess| {
        sess.last_gateway_start = Some(now);
        match state.config.vad_source {
            VadSource::Gateway => {
                OrchestratorMetrics::inc(&state.metrics.vad_starts);
                if let Some(feature_start) = sess.last_feature_start {
                    if let Some(delta) = now.checked_duration_since(feature_start) {
                        state
                            .metrics
                            .vad_agree_feature
                            .record(delta.as_millis() as u64);
                    }
                }
                state
                    .bargein
                    .on_speech_start(sess, SpeechSource::Gateway, now, out);
            }
            VadSource::Feature => {
                if let Some(feature_start) = sess.last_feature_start {
                    if let Some(delta) = now.checked_duration_since(feature_start) {
                        state
                            .metrics
                            .vad_agree_gateway
                            .record(delta.as_millis() as u64);
                    }
                }
            }
        }
    });
}

fn handle_tts(state: &Arc<AppState>, sid: &str, kind: TtsEventKind, first_audio_ms: u64, now: Instant) {
    match kind {
        TtsEventKind::Started => {
            state.registry.with_session(sid, |sess| {
                // Playback begins: clear speech tracking and move to
                // SPEAKING. The guard is NOT armed yet; synthesis latency
                // means real interrupts are still legitimate until audio
                // actually plays.
                sess.detector.reset_counters();
                set_phase(sess, Phase::Speaking, &state.metrics);
            });
        }
        TtsEventKind::FirstAudio => {
            state.registry.with_session(sid, |sess| {
                sess.detector.arm_guard(
                    state.config.min_rms as f64,
                    Duration::from_millis(state.config.guard_ms),
                    now,
                );
                debug!(session = %sid, guard_ms = state.config.guard_ms, "barge-in guard armed");
            });
            if first_audio_ms > 0 {
                state.metrics.tts_first_audio.record(first_audio_ms);
            }
        }
        TtsEventKind::Stopped => {
            state.registry.with_session(sid, |sess| {
                set_phase(sess, Phase::Listening, &state.metrics);
            });
        }
        TtsEventKind::Unknown => {}
    }
}

fn handle_transcript_final(
    state: &Arc<AppState>,
    out: &CommandSender,
    conn: &CancellationToken,
    sid: &str,
    utterance_id: &str,
    text: String,
) {
    if text.trim().is_empty() {
        debug!(session = %sid, "empty final transcript ignored");
        return;
    }
    info!(session = %sid, utterance = %utterance_id, "final transcript: {:?}", text);

    // At most one stream per session: a still-active request dies before
    // the next one starts.
    state.registry.cancel_llm(sid);

    let now = state.clock.now();
    let epoch = state.registry.with_session(sid, |sess| {
        set_phase(sess, Phase::Processing, &state.metrics);
        sess.last_final_at = Some(now);
        sess.first_sentence_observed = false;
        sess.turn_epoch += 1;
        sess.turn_epoch
    });

    let turn = TurnRequest {
        session_id: sid.to_string(),
        text,
        epoch,
    };
    tokio::spawn(run_turn(
        state.clone(),
        out.clone(),
        conn.child_token(),
        turn,
    ));
}
