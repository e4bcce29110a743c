//! Gateway control-stream shapes. Every inbound message carries a session
//! id plus one event variant; every outbound message carries a session id
//! plus one command variant.

use serde::{Deserialize, Serialize};

/// Inbound message from the media gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    #[serde(default)]
    pub session_id: String,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

/// Event variants emitted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    SessionOpen {
        #[serde(default)]
        room_url: String,
    },
    /// One scalar RMS per audio frame from the acoustic front-end.
    Feature { rms: f64 },
    /// Speech edge derived by the gateway's own neural VAD.
    VadStart {
        #[serde(default)]
        ts: u64,
    },
    VadEnd {
        #[serde(default)]
        ts: u64,
    },
    Tts {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        first_audio_ms: u64,
    },
    TranscriptInterim {
        #[serde(default)]
        text: String,
    },
    TranscriptFinal {
        #[serde(default)]
        utterance_id: String,
        #[serde(default)]
        text: String,
    },
    Error {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    },
    /// Unrecognized event kinds are ignored for forward compatibility.
    #[serde(other)]
    Unknown,
}

/// Parsed form of the TTS event's `type` field. New lifecycle kinds from
/// the gateway decode as `Unknown` and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsEventKind {
    Started,
    FirstAudio,
    Stopped,
    Unknown,
}

impl TtsEventKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "started" => Self::Started,
            "first_audio" => Self::FirstAudio,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Outbound message to the media gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub session_id: String,
    #[serde(flatten)]
    pub command: OrchestratorCommand,
}

impl CommandEnvelope {
    pub fn new(session_id: impl Into<String>, command: OrchestratorCommand) -> Self {
        Self {
            session_id: session_id.into(),
            command,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum OrchestratorCommand {
    /// Informs the gateway of the barge-in thresholds it should mirror.
    ArmBargeIn { guard_ms: u64, min_rms: u64 },
    StartMicToStt,
    /// Reserved for operator tooling; the orchestrator core never sends it.
    StopMicToStt,
    StartTts { text: String },
    StopTts { reason: String },
    /// Optional diagnostic reply.
    Ack { info: String },
}

impl OrchestratorCommand {
    /// Stable name used when logging send failures.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ArmBargeIn { .. } => "arm_barge_in",
            Self::StartMicToStt => "start_mic_to_stt",
            Self::StopMicToStt => "stop_mic_to_stt",
            Self::StartTts { .. } => "start_tts",
            Self::StopTts { .. } => "stop_tts",
            Self::Ack { .. } => "ack",
        }
    }
}
