//! Shared wiring handed to every connection and task.

use std::sync::Arc;

use viva_foundation::clock::SharedClock;
use viva_telemetry::OrchestratorMetrics;

use crate::bargein::BargeInController;
use crate::config::OrchConfig;
use crate::llm::LlmClientPool;
use crate::sessions::SessionRegistry;

pub struct AppState {
    pub config: Arc<OrchConfig>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: OrchestratorMetrics,
    pub clock: SharedClock,
    pub pool: Arc<LlmClientPool>,
    pub bargein: BargeInController,
}

impl AppState {
    pub fn new(config: OrchConfig, clock: SharedClock) -> Arc<Self> {
        let metrics = OrchestratorMetrics::default();
        let registry = Arc::new(SessionRegistry::new(config.vad, clock.clone()));
        let pool = Arc::new(LlmClientPool::new(config.llm.url.clone(), metrics.clone()));
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            metrics: metrics.clone(),
            clock,
            pool,
            bargein: BargeInController::new(metrics),
        })
    }
}
