//! Live-session index. The registry exclusively owns every `Session`;
//! other components reach one only through the registry's lock, and the
//! critical sections stay short (no awaits inside).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use viva_foundation::clock::SharedClock;
use viva_vad::{SpeechDetector, VadConfig};

use crate::phase::Phase;

pub struct Session {
    pub id: String,
    pub phase: Phase,
    pub detector: SpeechDetector,

    /// Most recent speech-start seen from each VAD source, kept for
    /// agreement timing only.
    pub last_feature_start: Option<Instant>,
    pub last_gateway_start: Option<Instant>,

    pub llm_active: bool,
    pub llm_cancel: Option<CancellationToken>,
    /// Bumped per final transcript; a conduction turn must present its
    /// epoch to attach or detach, so a slow stream from an earlier turn
    /// can never clobber the current one's state.
    pub turn_epoch: u64,
    pub last_final_at: Option<Instant>,
    pub first_sentence_observed: bool,

    pub speaking_since: Option<Instant>,
    pub last_event_at: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>, vad: VadConfig, now: Instant) -> Self {
        Self {
            id: id.into(),
            phase: Phase::Idle,
            detector: SpeechDetector::new(vad),
            last_feature_start: None,
            last_gateway_start: None,
            llm_active: false,
            llm_cancel: None,
            turn_epoch: 0,
            last_final_at: None,
            first_sentence_observed: false,
            speaking_since: None,
            last_event_at: now,
        }
    }

    /// Fires the stored cancel handle and clears it. Safe to call
    /// repeatedly; only the first call after an attach does anything.
    pub fn cancel_llm(&mut self) -> bool {
        if !self.llm_active {
            return false;
        }
        if let Some(token) = self.llm_cancel.take() {
            token.cancel();
        }
        self.llm_active = false;
        true
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    vad_defaults: VadConfig,
    clock: SharedClock,
}

impl SessionRegistry {
    pub fn new(vad_defaults: VadConfig, clock: SharedClock) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            vad_defaults,
            clock,
        }
    }

    /// Runs `f` against the session, creating it with default VAD
    /// parameters when absent. Also stamps the idle-sweep watermark.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let sess = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, self.vad_defaults, now));
        sess.last_event_at = now;
        f(sess)
    }

    /// Runs `f` against the session only if it already exists.
    pub fn with_existing<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock();
        sessions.get_mut(id).map(f)
    }

    /// Records the turn's cancel handle. Returns false when the turn has
    /// already been superseded (or the session is gone), in which case the
    /// caller must stand down.
    pub fn attach_llm(&self, id: &str, cancel: CancellationToken, epoch: u64) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(sess) if sess.turn_epoch == epoch => {
                sess.llm_cancel = Some(cancel);
                sess.llm_active = true;
                true
            }
            _ => false,
        }
    }

    /// Clears LLM flags after a stream finishes. Stale epochs and missing
    /// sessions are no-ops; the sweep may have reclaimed the session, or a
    /// newer turn may already own the slot.
    pub fn detach_llm(&self, id: &str, epoch: u64) {
        let mut sessions = self.sessions.lock();
        if let Some(sess) = sessions.get_mut(id) {
            if sess.turn_epoch == epoch {
                sess.llm_active = false;
                sess.llm_cancel = None;
            }
        }
    }

    pub fn cancel_llm(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(sess) => sess.cancel_llm(),
            None => false,
        }
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drops the session, releasing its cancel handle first.
    pub fn remove(&self, id: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(mut sess) = sessions.remove(id) {
            sess.cancel_llm();
            debug!(session = %id, "session removed");
        }
    }

    /// Reclaims sessions that have seen no events for `idle`.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock();
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_event_at) >= idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(mut sess) = sessions.remove(id) {
                sess.cancel_llm();
            }
        }
        stale.len()
    }

    /// Sessions that have been SPEAKING for at least `grace` without the
    /// guard ever arming for that turn: the gateway is not sending
    /// `first_audio` and barge-in is silently disabled.
    pub fn guard_unarmed_speaking(&self, grace: Duration) -> Vec<String> {
        let now = self.clock.now();
        let sessions = self.sessions.lock();
        sessions
            .values()
            .filter(|s| {
                s.phase == Phase::Speaking
                    && s.speaking_since.map_or(false, |since| {
                        now.saturating_duration_since(since) >= grace
                            && s.detector.armed_at().map_or(true, |armed| armed < since)
                    })
            })
            .map(|s| s.id.clone())
            .collect()
    }
}

pub fn spawn_idle_sweep(
    registry: Arc<SessionRegistry>,
    every: Duration,
    idle: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            let reclaimed = registry.sweep_idle(idle);
            if reclaimed > 0 {
                info!(reclaimed, "idle session sweep");
            }
        }
    })
}
