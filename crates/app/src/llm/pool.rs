//! Process-wide LLM client pool: lazy first dial, double-checked
//! re-acquisition, and explicit reconnect under exponential backoff with
//! jitter. Only the conductor asks for a reconnect, and only on
//! connection-level failure.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::info;
use viva_telemetry::OrchestratorMetrics;

use crate::llm::client::{LlmClient, LlmError};

const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_MAX_EXP: u32 = 5;
const JITTER_MS: u64 = 200;

pub struct LlmClientPool {
    url: String,
    client: RwLock<Option<Arc<LlmClient>>>,
    metrics: OrchestratorMetrics,
}

impl LlmClientPool {
    pub fn new(url: String, metrics: OrchestratorMetrics) -> Self {
        Self {
            url,
            client: RwLock::new(None),
            metrics,
        }
    }

    /// Returns the shared client, dialing lazily on first use. Concurrent
    /// callers race safely: the read path is lock-free of the dial, and the
    /// write path re-checks before dialing.
    pub async fn get(&self) -> Result<Arc<LlmClient>, LlmError> {
        {
            let guard = self.client.read().await;
            if let Some(client) = guard.as_ref() {
                if !client.is_closed() {
                    return Ok(client.clone());
                }
            }
        }

        let mut guard = self.client.write().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(client.clone());
            }
        }
        let client = LlmClient::connect(&self.url).await?;
        info!(url = %self.url, "llm client connected");
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Closes the current connection, sleeps the backoff, and re-dials.
    /// The reconnect counter moves only on success.
    pub async fn reconnect(&self, attempt: u32) -> Result<Arc<LlmClient>, LlmError> {
        {
            let mut guard = self.client.write().await;
            if let Some(client) = guard.take() {
                client.shutdown();
            }
        }

        tokio::time::sleep(backoff_delay(attempt)).await;

        let client = self.get().await?;
        OrchestratorMetrics::inc(&self.metrics.llm_reconnects);
        Ok(client)
    }
}

/// 200 ms × 2^min(attempt−1, 5) plus uniform jitter in [0, 200 ms).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(BACKOFF_MAX_EXP);
    let base = BACKOFF_BASE * 2u32.pow(exp);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..JITTER_MS));
    base + jitter
}
