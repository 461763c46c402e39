//! HTTP sync server for Le Stash.
//!
//! Peers pull from each other; this crate is the side being pulled from. It
//! exposes a store's identity and causal change log over two read-only
//! endpoints and never accepts writes.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::SyncServer;
