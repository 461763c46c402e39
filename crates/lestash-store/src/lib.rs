//! Change log store boundary for Le Stash sync.
//!
//! The sync coordinator treats the store as an opaque merge engine: it asks
//! for the site id, the logical database version, the causal change log since
//! a version, and hands remote entries to `apply`. This crate defines that
//! boundary and two implementations of it.
//!
//! # Storage Backends
//!
//! All backends implement the [`ChangeLogStore`] trait:
//!
//! - [`InMemoryChangeLog`] -- lock-guarded maps, for tests and embedding
//! - [`SqliteChangeLog`] -- durable store on bundled SQLite
//!
//! # Design Rules
//!
//! 1. Column-level last-writer-wins: causal length first, then column
//!    version, then value, then origin site (see [`merge`]).
//! 2. Apply is idempotent per entry and atomic per batch.
//! 3. One local commit bumps the database version by exactly one.
//! 4. The text index is derived and local; apply does not maintain it.

pub mod error;
pub mod index;
pub mod memory;
pub mod merge;
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use index::{tokenize, SearchHit, TextIndex, INDEXED_COLUMNS, INDEXED_TABLE};
pub use memory::InMemoryChangeLog;
pub use merge::{compare_values, ClockRecord, MergeOutcome, RowState, Stamp};
pub use sqlite::{SqliteChangeLog, STORE_SCHEMA_VERSION};
pub use traits::{ChangeLogStore, ChangeSnapshot};
