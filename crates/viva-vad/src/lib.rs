pub mod config;
pub mod detector;

pub use config::VadConfig;
pub use detector::{FrameDecision, SpeechDetector};
