//! Wire protocol for Le Stash sync.
//!
//! Defines the endpoint paths and JSON bodies exchanged between a requesting
//! peer and a serving peer. Sync is pull-only: a requester reads
//! `GET /sync/status`, then `GET /sync/changes?since=` from the server.

pub mod endpoint;
pub mod error;
pub mod message;

pub use endpoint::{endpoints, ChangesQuery, HealthResponse};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ChangesResponse, ProtocolInfo, StatusResponse};
