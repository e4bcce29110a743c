//! Shared metrics for cross-task orchestrator monitoring. Counters are
//! plain atomics; latency families keep running aggregates plus a bounded
//! window of recent samples for the probe endpoint's snapshot.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const RECENT_SAMPLE_CAP: usize = 256;

/// One latency family: count/sum/max plus a recent-sample window (ms).
#[derive(Default)]
pub struct LatencyStats {
    count: AtomicU64,
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
    recent: RwLock<VecDeque<u64>>,
}

impl LatencyStats {
    pub fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        let mut recent = self.recent.write();
        if recent.len() == RECENT_SAMPLE_CAP {
            recent.pop_front();
        }
        recent.push_back(ms);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms.load(Ordering::Relaxed)
    }

    pub fn mean_ms(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn recent(&self) -> Vec<u64> {
        self.recent.read().iter().copied().collect()
    }
}

/// Counts phase transitions by (from, to) label pair. Self-transitions are
/// suppressed by the caller before reaching here.
#[derive(Default)]
pub struct PhaseTransitions {
    counts: RwLock<HashMap<(&'static str, &'static str), u64>>,
}

impl PhaseTransitions {
    pub fn record(&self, from: &'static str, to: &'static str) {
        *self.counts.write().entry((from, to)).or_insert(0) += 1;
    }

    pub fn get(&self, from: &'static str, to: &'static str) -> u64 {
        self.counts.read().get(&(from, to)).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<((&'static str, &'static str), u64)> {
        let mut entries: Vec<_> = self
            .counts
            .read()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        entries.sort();
        entries
    }
}

/// Shared metrics handle, cloned into every task that observes something.
#[derive(Clone, Default)]
pub struct OrchestratorMetrics {
    pub vad_features: Arc<AtomicU64>,
    pub vad_starts: Arc<AtomicU64>,
    pub vad_ends: Arc<AtomicU64>,
    pub barge_ins: Arc<AtomicU64>,
    pub guard_blocks: Arc<AtomicU64>,
    pub llm_reconnects: Arc<AtomicU64>,

    pub transitions: Arc<PhaseTransitions>,

    pub barge_in_latency: Arc<LatencyStats>,
    pub tts_first_audio: Arc<LatencyStats>,
    pub llm_first_sentence: Arc<LatencyStats>,
    /// Feature VAD primary: delay until the gateway VAD agreed.
    pub vad_agree_gateway: Arc<LatencyStats>,
    /// Gateway VAD primary: delay until the feature VAD agreed.
    pub vad_agree_feature: Arc<LatencyStats>,
}

impl OrchestratorMetrics {
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Plain-text dump served by the probe endpoint. Names follow the
    /// original operational dashboards.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let counters: [(&str, &AtomicU64); 6] = [
            ("orch_vad_features_total", &self.vad_features),
            ("orch_vad_starts_total", &self.vad_starts),
            ("orch_vad_ends_total", &self.vad_ends),
            ("orch_barge_in_events_total", &self.barge_ins),
            ("orch_barge_in_guard_blocks_total", &self.guard_blocks),
            ("orch_llm_reconnects_total", &self.llm_reconnects),
        ];
        for (name, counter) in counters {
            out.push_str(&format!("{} {}\n", name, Self::get(counter)));
        }

        for ((from, to), count) in self.transitions.snapshot() {
            out.push_str(&format!(
                "orch_state_transitions_total{{from=\"{}\",to=\"{}\"}} {}\n",
                from, to, count
            ));
        }

        let families: [(&str, &LatencyStats); 5] = [
            ("orch_barge_in_latency_ms", &self.barge_in_latency),
            ("orch_tts_first_audio_ms", &self.tts_first_audio),
            ("orch_llm_first_sentence_ms", &self.llm_first_sentence),
            ("orch_vad_agree_gateway_ms", &self.vad_agree_gateway),
            ("orch_vad_agree_feature_ms", &self.vad_agree_feature),
        ];
        for (name, stats) in families {
            out.push_str(&format!(
                "{}_count {}\n{}_mean {:.1}\n{}_max {}\n",
                name,
                stats.count(),
                name,
                stats.mean_ms(),
                name,
                stats.max_ms()
            ));
        }
        out
    }
}
