use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("Shell spawn failed: {0}")]
    ShellSpawn(String),

    #[error("Shell command timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Backend failure for room {room}: {reason}")]
    Backend { room: String, reason: String },

    #[error("Dispatch failed for room {room}: {reason}")]
    Dispatch { room: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
