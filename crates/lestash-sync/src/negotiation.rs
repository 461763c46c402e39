use serde::{Deserialize, Serialize};

use lestash_types::ProtocolDescriptor;

/// Result of comparing two protocol descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Negotiation {
    /// Sync may proceed. Warnings are informational.
    Compatible { warnings: Vec<String> },
    /// Sync must not proceed.
    Incompatible { reason: String },
}

impl Negotiation {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Compatible { warnings } => warnings,
            Self::Incompatible { .. } => &[],
        }
    }
}

/// Protocol compatibility check between the local store and a peer.
///
/// Protocol version and changeset format must match exactly and are checked
/// first, so an incompatible result never carries warnings. Schema version,
/// merge engine major version, and replicated table differences only warn.
/// Pure: no network or store access.
pub struct ProtocolNegotiator;

impl ProtocolNegotiator {
    pub fn negotiate(local: &ProtocolDescriptor, remote: &ProtocolDescriptor) -> Negotiation {
        if local.protocol_version != remote.protocol_version {
            return Negotiation::Incompatible {
                reason: format!(
                    "protocol version mismatch: local {}, remote {}",
                    local.protocol_version, remote.protocol_version
                ),
            };
        }
        if local.changeset_format != remote.changeset_format {
            return Negotiation::Incompatible {
                reason: format!(
                    "changeset format mismatch: local {:?}, remote {:?}",
                    local.changeset_format, remote.changeset_format
                ),
            };
        }

        let mut warnings = Vec::new();
        if local.schema_version != remote.schema_version {
            warnings.push(format!(
                "schema version mismatch: local {}, remote {}",
                local.schema_version, remote.schema_version
            ));
        }
        match (local.merge_engine_major(), remote.merge_engine_major()) {
            (Some(l), Some(r)) if l != r => warnings.push(format!(
                "merge engine major version mismatch: local {}, remote {}",
                local.merge_engine_version, remote.merge_engine_version
            )),
            (Some(_), Some(_)) => {}
            _ => warnings.push(format!(
                "cannot compare merge engine versions: local {:?}, remote {:?}",
                local.merge_engine_version, remote.merge_engine_version
            )),
        }
        let foreign: Vec<&str> = remote
            .replicated_tables
            .difference(&local.replicated_tables)
            .map(String::as_str)
            .collect();
        if !foreign.is_empty() {
            warnings.push(format!(
                "remote replicates tables unknown locally, their changes will be ignored: {}",
                foreign.join(", ")
            ));
        }
        Negotiation::Compatible { warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ProtocolDescriptor {
        ProtocolDescriptor::current()
    }

    #[test]
    fn identical_descriptors_are_compatible_without_warnings() {
        let n = ProtocolNegotiator::negotiate(&local(), &local());
        assert_eq!(n, Negotiation::Compatible { warnings: vec![] });
    }

    #[test]
    fn protocol_version_mismatch_is_incompatible() {
        let mut remote = local();
        remote.protocol_version = 2;
        remote.schema_version = 9;
        match ProtocolNegotiator::negotiate(&local(), &remote) {
            Negotiation::Incompatible { reason } => assert!(reason.contains("protocol")),
            other => panic!("expected incompatible, got {other:?}"),
        }
    }

    #[test]
    fn format_mismatch_is_incompatible() {
        let mut remote = local();
        remote.changeset_format = "other".into();
        let n = ProtocolNegotiator::negotiate(&local(), &remote);
        assert!(!n.is_compatible());
        assert!(n.warnings().is_empty());
        match n {
            Negotiation::Incompatible { reason } => assert!(reason.contains("format")),
            other => panic!("expected incompatible, got {other:?}"),
        }
    }

    #[test]
    fn schema_mismatch_is_one_warning() {
        let mut remote = local();
        remote.schema_version = 2;
        let n = ProtocolNegotiator::negotiate(&local(), &remote);
        assert!(n.is_compatible());
        assert_eq!(n.warnings().len(), 1);
        assert!(n.warnings()[0].contains("schema"));
    }

    #[test]
    fn engine_versions_compared_by_major_only() {
        let mut remote = local();
        remote.merge_engine_version = "0.17.0".into();
        assert!(ProtocolNegotiator::negotiate(&local(), &remote).warnings().is_empty());

        remote.merge_engine_version = "1.0.0".into();
        let n = ProtocolNegotiator::negotiate(&local(), &remote);
        assert_eq!(n.warnings().len(), 1);
        assert!(n.warnings()[0].contains("merge engine"));
    }

    #[test]
    fn unparseable_engine_version_warns() {
        let mut remote = local();
        remote.merge_engine_version = "dev".into();
        let n = ProtocolNegotiator::negotiate(&local(), &remote);
        assert!(n.is_compatible());
        assert!(n.warnings()[0].contains("cannot compare"));
    }

    #[test]
    fn extra_remote_tables_warn() {
        let mut remote = local();
        remote.replicated_tables.insert("bookmarks".into());
        let n = ProtocolNegotiator::negotiate(&local(), &remote);
        assert!(n.is_compatible());
        assert!(n.warnings()[0].contains("bookmarks"));
    }
}
