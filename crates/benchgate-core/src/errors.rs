use thiserror::Error;

/// Engine error taxonomy. Store and engine entry points return this so
/// callers can match on the failure class instead of parsing strings.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or inconsistent raw counts. Rejected before any write.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced transaction or snapshot version does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Regression detection requires a designated baseline.
    #[error("no baseline designated for config '{0}'")]
    NoBaseline(String),

    /// No current snapshot (the config has zero snapshots).
    #[error("no current snapshot for config '{0}'")]
    NoCurrent(String),

    /// The backing store rejected an atomic pointer swap; retryable.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// True for errors the caller should retry the whole call on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}
