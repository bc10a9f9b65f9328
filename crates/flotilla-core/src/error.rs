//! Error types for flotilla

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("pane unavailable: {0}")]
    PaneUnavailable(String),

    #[error("pane not found: {0}")]
    PaneNotFound(String),

    #[error("session gone: {0}")]
    SessionGone(String),

    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("crash loop: {0}")]
    CrashLoop(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::SpawnFailed(msg.into())
    }

    /// Whether this error maps to a client-side (4xx) HTTP status.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::NotFound(_)
                | Self::PaneNotFound(_)
                | Self::Conflict(_)
                | Self::PreconditionFailed(_)
        )
    }
}
