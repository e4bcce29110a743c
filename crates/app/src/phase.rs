//! Coarse interaction state per session. Transitions are counted for
//! observability; self-transitions are suppressed.

use viva_telemetry::OrchestratorMetrics;

use crate::sessions::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Processing => "processing",
            Phase::Speaking => "speaking",
        }
    }
}

/// Moves a session to `to`, recording the transition. Entering SPEAKING
/// stamps `speaking_since` so the health monitor can spot sessions whose
/// guard never armed.
pub fn set_phase(sess: &mut Session, to: Phase, metrics: &OrchestratorMetrics) {
    let from = sess.phase;
    if from == to {
        return;
    }
    tracing::debug!(session = %sess.id, from = from.as_str(), to = to.as_str(), "phase transition");
    metrics.transitions.record(from.as_str(), to.as_str());
    sess.phase = to;
    sess.speaking_since = if to == Phase::Speaking {
        Some(sess.last_event_at)
    } else {
        None
    };
}
