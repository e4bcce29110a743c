use std::time::{Duration, Instant};

use crate::config::VadConfig;

/// Guard value used when a session is staged but not yet armed: far enough
/// out that barge-in stays disabled until TTS first audio arms a real window.
const STAGED_GUARD: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of feeding one feature frame to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    NoChange,
    /// Above-threshold frame swallowed by the anti-echo guard window.
    GuardBlocked,
    SpeechStart,
    SpeechEnd,
}

/// Energy-driven speech detector for a single session.
///
/// Speech starts after `min_start` consecutive above-threshold frames and
/// ends after `hangover` consecutive below-threshold frames. While the
/// guard window is open, above-threshold frames are dropped entirely so the
/// session cannot barge in on its own echo.
pub struct SpeechDetector {
    config: VadConfig,
    speaking: bool,
    consec_speech: u32,
    non_speech: u32,
    guard_until: Option<Instant>,
    armed_at: Option<Instant>,
}

impl SpeechDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            consec_speech: 0,
            non_speech: 0,
            guard_until: None,
            armed_at: None,
        }
    }

    /// Stages the threshold on session open. The guard lands in the far
    /// future, which keeps barge-in disabled until `arm_guard` runs.
    pub fn stage_guard(&mut self, min_rms: f64, now: Instant) {
        self.config.min_rms = min_rms;
        self.guard_until = Some(now + STAGED_GUARD);
    }

    /// Arms the real guard window on TTS first audio.
    pub fn arm_guard(&mut self, min_rms: f64, guard: Duration, now: Instant) {
        self.config.min_rms = min_rms;
        self.armed_at = Some(now);
        self.guard_until = Some(now + guard);
    }

    /// Clears speech tracking when TTS playback begins.
    pub fn reset_counters(&mut self) {
        self.speaking = false;
        self.consec_speech = 0;
        self.non_speech = 0;
    }

    pub fn on_frame(&mut self, rms: f64, now: Instant) -> FrameDecision {
        if !self.speaking {
            if self.guard_active(now) && rms >= self.config.min_rms {
                return FrameDecision::GuardBlocked;
            }
            if rms >= self.config.min_rms {
                self.consec_speech += 1;
                if self.consec_speech >= self.config.min_start {
                    self.speaking = true;
                    self.non_speech = 0;
                    return FrameDecision::SpeechStart;
                }
            } else {
                self.consec_speech = 0;
            }
            return FrameDecision::NoChange;
        }

        if rms < self.config.min_rms {
            self.non_speech += 1;
            if self.non_speech >= self.config.hangover {
                self.speaking = false;
                self.consec_speech = 0;
                self.non_speech = 0;
                return FrameDecision::SpeechEnd;
            }
        } else {
            self.non_speech = 0;
        }
        FrameDecision::NoChange
    }

    /// Strictly-before comparison: the first frame at or after expiry may
    /// trigger, the frame before it may not.
    fn guard_active(&self, now: Instant) -> bool {
        matches!(self.guard_until, Some(until) if now < until)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn consec_speech(&self) -> u32 {
        self.consec_speech
    }

    pub fn non_speech(&self) -> u32 {
        self.non_speech
    }

    pub fn min_rms(&self) -> f64 {
        self.config.min_rms
    }

    pub fn is_above_threshold(&self, rms: f64) -> bool {
        rms >= self.config.min_rms
    }

    pub fn guard_until(&self) -> Option<Instant> {
        self.guard_until
    }

    pub fn armed_at(&self) -> Option<Instant> {
        self.armed_at
    }
}
