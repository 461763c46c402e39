//! Peer registry for Le Stash sync.
//!
//! Durable bookkeeping of known peers: where each one lives, which site it
//! turned out to be, and the remote database version through which its
//! changes have been applied locally.
//!
//! # Backends
//!
//! - [`InMemoryPeerRegistry`] -- for tests and embedding
//! - [`SqlitePeerRegistry`] -- `sync_peers` table on SQLite
//!
//! # Design Rules
//!
//! 1. `last_synced_version` never decreases.
//! 2. A peer's site id, once learned, never silently changes.
//! 3. Only a successful sync run calls `update_sync_status`.
//! 4. Removing a peer has no effect on the change log store.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod validate;

pub use error::{RegistryError, RegistryResult};
pub use memory::InMemoryPeerRegistry;
pub use sqlite::SqlitePeerRegistry;
pub use traits::PeerRegistry;
pub use validate::{validate_address, validate_name, validate_new_peer, validate_port, MAX_NAME_LEN};
