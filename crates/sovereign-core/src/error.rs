use thiserror::Error;

#[derive(Debug, Error)]
pub enum SovereignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chat gateway error: {0}")]
    Gateway(String),

    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SovereignError>;
