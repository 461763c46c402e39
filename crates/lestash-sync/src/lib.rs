//! Synchronization coordinator for Le Stash.
//!
//! Pull-only replication between independent local stores: the local
//! instance always initiates and always applies, the remote only serves its
//! status and change log.
//!
//! - [`ProtocolNegotiator`] decides whether two stores can sync at all.
//! - [`SyncTransport`] issues the two remote reads; [`HttpTransport`] does so
//!   over HTTP with per-request timeouts.
//! - [`ReplicationCoordinator`] runs negotiate, fetch, apply, index, record
//!   against one peer and turns every failure into a [`SyncOutcome`].
//! - [`SyncSessionManager`] runs the coordinator over peers sequentially.
//! - [`bundle`] moves the same change log through files instead of a socket.
//!
//! Push-based sync is not part of protocol version 1.

pub mod bundle;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod negotiation;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use bundle::{apply_bundle, export_bundle, import_bundle, write_bundle, ExportSummary, ImportSummary};
pub use coordinator::ReplicationCoordinator;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{HttpTransport, TransportConfig};
pub use negotiation::{Negotiation, ProtocolNegotiator};
pub use session::{SessionStatus, SyncSessionManager};
pub use transport::SyncTransport;
pub use types::{SyncOutcome, SyncPhase};
