//! Orchestrator configuration, assembled once at startup. Handlers receive
//! the finished struct; nothing reads the environment after boot.

use std::time::Duration;

use viva_foundation::env::{env_str, env_str_chain, env_u64};
use viva_foundation::OrchError;
use viva_vad::VadConfig;

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// Default system message when `LLM_SYSTEM_PROMPT` is unset: keeps replies
/// in a shape the TTS engine can speak.
const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant in a live conversation. \
Answer in short, plain sentences that sound natural when read aloud. \
Avoid lists, markdown, and long preambles.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSource {
    Feature,
    Gateway,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// WebSocket URL of the LLM adapter.
    pub url: String,
    pub deployment: String,
    pub api_version: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone)]
pub struct OrchConfig {
    /// Gateway control-stream listen address.
    pub listen_addr: String,
    /// Health/metrics listen address.
    pub probe_addr: String,

    pub vad_source: VadSource,
    /// Barge-in guard duration applied at TTS first audio.
    pub guard_ms: u64,
    /// RMS threshold mirrored to the gateway in ArmBargeIn.
    pub min_rms: u64,
    pub vad: VadConfig,

    pub session_idle: Duration,
    pub llm: LlmConfig,
}

impl OrchConfig {
    /// Builds the configuration from the environment. A typo'd VAD source
    /// fails startup rather than silently switching the primary.
    pub fn from_env() -> Result<Self, OrchError> {
        let vad_source = match env_str("ORCH_VAD_SOURCE", "feature").as_str() {
            "feature" => VadSource::Feature,
            "gateway" => VadSource::Gateway,
            other => {
                return Err(OrchError::Config(format!(
                    "ORCH_VAD_SOURCE must be \"feature\" or \"gateway\", got {:?}",
                    other
                )))
            }
        };

        let guard_ms = env_u64("LOCAL_STOP_GUARD_MS", 1000);
        let min_rms = env_u64("LOCAL_STOP_MIN_RMS", 1200);

        Ok(Self {
            listen_addr: normalize_listen(&env_str("ORCH_ADDR", ":9090")),
            probe_addr: normalize_listen(&env_str("ORCH_PROBE_ADDR", ":8082")),
            vad_source,
            guard_ms,
            min_rms,
            vad: VadConfig {
                min_rms: min_rms as f64,
                ..VadConfig::default()
            },
            session_idle: Duration::from_secs(env_u64("ORCH_SESSION_IDLE_SECS", 900)),
            llm: LlmConfig {
                url: normalize_ws_url(&env_str("LLM_ADDR", ":9092")),
                deployment: env_str_chain(&["LLM_DEPLOYMENT", "AZURE_OPENAI_DEPLOYMENT"], ""),
                api_version: env_str_chain(
                    &["LLM_API_VERSION", "AZURE_OPENAI_API_VERSION"],
                    DEFAULT_API_VERSION,
                ),
                system_prompt: env_str("LLM_SYSTEM_PROMPT", DEFAULT_SYSTEM_PROMPT),
            },
        })
    }
}

/// `:9090` style addresses bind all interfaces.
fn normalize_listen(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{}", port)
    } else {
        addr.to_string()
    }
}

/// The LLM address accepts bare `host:port` or `:port` forms; anything
/// without a scheme dials plaintext WebSocket.
fn normalize_ws_url(addr: &str) -> String {
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        return addr.to_string();
    }
    if let Some(port) = addr.strip_prefix(':') {
        return format!("ws://127.0.0.1:{}", port);
    }
    format!("ws://{}", addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ALL_VARS: &[&str] = &[
        "ORCH_ADDR",
        "ORCH_PROBE_ADDR",
        "ORCH_VAD_SOURCE",
        "LOCAL_STOP_GUARD_MS",
        "LOCAL_STOP_MIN_RMS",
        "ORCH_SESSION_IDLE_SECS",
        "LLM_ADDR",
        "LLM_DEPLOYMENT",
        "AZURE_OPENAI_DEPLOYMENT",
        "LLM_API_VERSION",
        "AZURE_OPENAI_API_VERSION",
        "LLM_SYSTEM_PROMPT",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let cfg = OrchConfig::from_env().unwrap();

        assert_eq!(cfg.listen_addr, "0.0.0.0:9090");
        assert_eq!(cfg.probe_addr, "0.0.0.0:8082");
        assert_eq!(cfg.vad_source, VadSource::Feature);
        assert_eq!(cfg.guard_ms, 1000);
        assert_eq!(cfg.min_rms, 1200);
        assert!((cfg.vad.min_rms - 1200.0).abs() < f64::EPSILON);
        assert_eq!(cfg.llm.url, "ws://127.0.0.1:9092");
        assert_eq!(cfg.llm.api_version, DEFAULT_API_VERSION);
        assert!(cfg.llm.system_prompt.contains("voice assistant"));
    }

    #[test]
    #[serial]
    fn test_azure_fallback_chain() {
        clear_env();
        env::set_var("AZURE_OPENAI_DEPLOYMENT", "azure-dep");
        env::set_var("AZURE_OPENAI_API_VERSION", "2024-06-01");

        let cfg = OrchConfig::from_env().unwrap();
        assert_eq!(cfg.llm.deployment, "azure-dep");
        assert_eq!(cfg.llm.api_version, "2024-06-01");

        env::set_var("LLM_DEPLOYMENT", "direct-dep");
        env::set_var("LLM_API_VERSION", "2024-07-01");
        let cfg = OrchConfig::from_env().unwrap();
        assert_eq!(cfg.llm.deployment, "direct-dep");
        assert_eq!(cfg.llm.api_version, "2024-07-01");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_gateway_vad_source() {
        clear_env();
        env::set_var("ORCH_VAD_SOURCE", "gateway");
        let cfg = OrchConfig::from_env().unwrap();
        assert_eq!(cfg.vad_source, VadSource::Gateway);

        env::set_var("ORCH_VAD_SOURCE", "telepathy");
        assert!(OrchConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_ws_url_normalization() {
        assert_eq!(normalize_ws_url(":9092"), "ws://127.0.0.1:9092");
        assert_eq!(normalize_ws_url("llm.internal:9092"), "ws://llm.internal:9092");
        assert_eq!(normalize_ws_url("ws://a:1"), "ws://a:1");
        assert_eq!(normalize_ws_url("wss://a:1"), "wss://a:1");
    }
}
