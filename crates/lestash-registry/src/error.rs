//! Error types for peer registry operations.

use thiserror::Error;

use lestash_types::{PeerId, SiteId};

/// Errors that can occur during peer registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No peer with this id is registered.
    #[error("peer not found: {id}")]
    NotFound { id: PeerId },

    /// A peer with this name is already registered.
    #[error("peer already exists: {name}")]
    DuplicateName { name: String },

    /// A registration field failed validation.
    #[error("invalid peer {field}: {reason}")]
    InvalidPeer { field: &'static str, reason: String },

    /// The peer reported a different site id than the one recorded.
    #[error("peer {id} was recorded as site {recorded} but now reports {reported}")]
    SiteConflict { id: PeerId, recorded: SiteId, reported: SiteId },

    /// Error from the embedded SQLite database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Persisted registry state could not be decoded.
    #[error("corrupt registry record: {0}")]
    Corrupt(String),

    /// A lock guarding the registry was poisoned.
    #[error("registry lock poisoned")]
    LockPoisoned,
}

/// Convenience type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
