//! LLM session-stream shapes. The orchestrator multiplexes per-request
//! streams over one connection, so every server frame is enveloped with the
//! request id it belongs to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub session_id: String,
    pub request_id: String,
    pub deployment: String,
    pub api_version: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Client-to-server frames. Cancel is best-effort; cancelling the request
/// scope locally is the primary mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum LlmClientMessage {
    Start(StartRequest),
    Cancel { request_id: String },
}

/// Server-to-client frame: request id plus one message variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmServerFrame {
    #[serde(default)]
    pub request_id: String,
    #[serde(flatten)]
    pub msg: LlmServerMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum LlmServerMessage {
    Connected {
        #[serde(default)]
        session_id: String,
    },
    Token {
        #[serde(default)]
        text: String,
    },
    /// A complete spoken unit as segmented by the LLM adapter.
    Sentence {
        #[serde(default)]
        text: String,
    },
    Usage {
        #[serde(default)]
        prompt_tokens: u32,
        #[serde(default)]
        completion_tokens: u32,
        #[serde(default)]
        total_tokens: u32,
    },
    Error {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}
