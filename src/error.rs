use thiserror::Error;

pub type Result<T, E = KeelraceError> = std::result::Result<T, E>;

/// Unified error type covering the failure surfaces of the engine's
/// collaborators. Keystroke handling itself is infallible; these only show
/// up around persistence, corpus, and channel calls.
#[derive(Debug, Error)]
pub enum KeelraceError {
    #[error("storage error: {0}")]
    Storage(String),
    /// Local store ran out of room. Distinct from `Storage` so callers can
    /// surface it as a non-fatal warning instead of a failed operation.
    #[error("storage quota exceeded: {0}")]
    StorageQuota(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("corpus error: {0}")]
    Corpus(String),
    #[error("unknown game: {0}")]
    UnknownGame(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KeelraceError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }
}
