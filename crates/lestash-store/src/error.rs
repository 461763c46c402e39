/// Errors from change log store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Error from the embedded SQLite database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Persisted store state is inconsistent.
    #[error("corrupt store state: {0}")]
    Corrupt(String),

    /// The on-disk store was written by a newer build.
    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// A lock guarding the store was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// The merge engine refused the batch as a whole.
    #[error("apply rejected: {0}")]
    ApplyRejected(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
