//! Foundation types for Le Stash sync.
//!
//! Every other `lestash-*` crate depends on `lestash-types`.
//!
//! # Key Types
//!
//! - [`SiteId`] -- stable identifier of one store replica
//! - [`ProtocolDescriptor`] -- a store's sync capability, compared during negotiation
//! - [`ChangeEntry`] -- one column-level record of the causal change log
//! - [`Peer`] / [`NewPeer`] -- a registered remote store and its replication watermark

pub mod change;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod site;

pub use change::{causal_order, is_causally_ordered, ChangeEntry, DbVersion, SENTINEL_CID};
pub use error::TypeError;
pub use peer::{NewPeer, Peer, PeerId, DEFAULT_SYNC_PORT};
pub use protocol::{
    ProtocolDescriptor, CHANGESET_FORMAT, MERGE_ENGINE_VERSION, PROTOCOL_VERSION, SCHEMA_VERSION,
    SYNC_TABLES,
};
pub use site::{SiteId, SITE_ID_LEN};
