use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unsupported changeset format: expected {expected}, got {found}")]
    UnsupportedFormat { expected: String, found: String },

    #[error("change count mismatch: declared {declared}, received {actual}")]
    CountMismatch { declared: usize, actual: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
