pub mod metrics;

pub use metrics::{LatencyStats, OrchestratorMetrics, PhaseTransitions};
