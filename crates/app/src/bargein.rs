//! Barge-in arbitration: a confirmed speech-start may stop TTS and cancel
//! the in-flight LLM stream, but only while the session is actually
//! speaking and the anti-echo guard has expired.

use std::time::Instant;

use tracing::{debug, info};
use viva_protocol::{CommandEnvelope, OrchestratorCommand};
use viva_telemetry::OrchestratorMetrics;

use crate::gateway::CommandSender;
use crate::phase::Phase;
use crate::sessions::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechSource {
    Feature,
    Gateway,
}

pub struct BargeInController {
    metrics: OrchestratorMetrics,
}

impl BargeInController {
    pub fn new(metrics: OrchestratorMetrics) -> Self {
        Self { metrics }
    }

    /// Handles a confirmed speech-start from the primary VAD source. Runs
    /// inside the registry lock; the StopTTS enqueue and the LLM cancel
    /// both complete before the gateway reader moves to its next event.
    ///
    /// Returns true when barge-in fired.
    pub fn on_speech_start(
        &self,
        sess: &mut Session,
        source: SpeechSource,
        now: Instant,
        out: &CommandSender,
    ) -> bool {
        if sess.phase != Phase::Speaking {
            debug!(
                session = %sess.id,
                phase = sess.phase.as_str(),
                ?source,
                "speech start outside SPEAKING, no barge-in"
            );
            return false;
        }
        if let Some(until) = sess.detector.guard_until() {
            if now < until {
                debug!(session = %sess.id, ?source, "speech start inside guard window, no barge-in");
                return false;
            }
        }

        info!(session = %sess.id, ?source, "barge-in: stopping TTS");
        out.send(CommandEnvelope::new(
            &sess.id,
            OrchestratorCommand::StopTts {
                reason: "barge_in".into(),
            },
        ));
        OrchestratorMetrics::inc(&self.metrics.barge_ins);

        sess.cancel_llm();

        if let Some(until) = sess.detector.guard_until() {
            // Guard expiry to detected start; clamped at zero by the phase
            // gate above.
            let latency_ms = now.saturating_duration_since(until).as_millis() as u64;
            self.metrics.barge_in_latency.record(latency_ms);
        }

        match source {
            SpeechSource::Feature => {
                if let Some(gateway_start) = sess.last_gateway_start {
                    let delta = now.saturating_duration_since(gateway_start);
                    info!(
                        session = %sess.id,
                        delta_ms = delta.as_millis() as u64,
                        "gateway VAD preceded feature barge-in"
                    );
                }
            }
            SpeechSource::Gateway => {
                if let Some(feature_start) = sess.last_feature_start {
                    let delta = now.saturating_duration_since(feature_start);
                    info!(
                        session = %sess.id,
                        delta_ms = delta.as_millis() as u64,
                        "feature VAD preceded gateway barge-in"
                    );
                }
            }
        }
        true
    }
}
