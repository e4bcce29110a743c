//! Wire shapes for the two streams the orchestrator speaks on: the gateway
//! control stream and the LLM session stream. Both are tagged JSON over a
//! bidirectional transport; unknown tags decode to an `Unknown` variant so
//! new peers can ship event kinds before the orchestrator learns them.

pub mod gateway;
pub mod llm;

pub use gateway::{CommandEnvelope, GatewayEnvelope, GatewayEvent, OrchestratorCommand, TtsEventKind};
pub use llm::{ChatMessage, LlmClientMessage, LlmServerFrame, LlmServerMessage, StartRequest};
