use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchError {
    #[error("Configuration error: {0}")]
    Config(String),
}
