pub mod client;
pub mod conductor;
pub mod pool;

pub use client::{LlmClient, LlmError, LlmSession};
pub use conductor::{run_turn, TurnRequest};
pub use pool::LlmClientPool;
