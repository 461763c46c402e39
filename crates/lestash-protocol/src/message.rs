use serde::{Deserialize, Serialize};

use lestash_types::{ChangeEntry, DbVersion, ProtocolDescriptor, SiteId, CHANGESET_FORMAT};

use crate::error::{ProtocolError, ProtocolResult};

/// `protocol` object of a status response.
///
/// Older peers name the engine version `crsqlite_version`; both spellings
/// are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub version: u32,
    pub format: String,
    pub schema_version: u32,
    #[serde(alias = "crsqlite_version")]
    pub merge_engine_version: String,
    pub sync_tables: Vec<String>,
}

impl From<&ProtocolDescriptor> for ProtocolInfo {
    fn from(d: &ProtocolDescriptor) -> Self {
        Self {
            version: d.protocol_version,
            format: d.changeset_format.clone(),
            schema_version: d.schema_version,
            merge_engine_version: d.merge_engine_version.clone(),
            sync_tables: d.replicated_tables.iter().cloned().collect(),
        }
    }
}

impl ProtocolInfo {
    pub fn to_descriptor(&self) -> ProtocolDescriptor {
        ProtocolDescriptor {
            protocol_version: self.version,
            changeset_format: self.format.clone(),
            schema_version: self.schema_version,
            merge_engine_version: self.merge_engine_version.clone(),
            replicated_tables: self.sync_tables.iter().cloned().collect(),
        }
    }
}

/// Body of `GET /sync/status`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub site_id: SiteId,
    pub db_version: DbVersion,
    pub protocol: ProtocolInfo,
}

impl StatusResponse {
    pub fn new(site_id: SiteId, db_version: DbVersion, descriptor: &ProtocolDescriptor) -> Self {
        Self { site_id, db_version, protocol: descriptor.into() }
    }
}

/// Body of `GET /sync/changes`, and the layout of an export bundle.
///
/// Only `changes` is mandatory on the wire; peers that predate the envelope
/// send nothing else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<SiteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_version: Option<DbVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_version: Option<DbVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_count: Option<usize>,
    pub changes: Vec<ChangeEntry>,
}

impl ChangesResponse {
    /// Full envelope for a change log read.
    pub fn new(site_id: SiteId, db_version: DbVersion, since: DbVersion, changes: Vec<ChangeEntry>) -> Self {
        Self {
            format: Some(CHANGESET_FORMAT.to_string()),
            site_id: Some(site_id),
            db_version: Some(db_version),
            since_version: Some(since),
            change_count: Some(changes.len()),
            changes,
        }
    }

    /// Check the envelope against its own payload.
    pub fn validate(&self) -> ProtocolResult<()> {
        if let Some(format) = &self.format {
            if format != CHANGESET_FORMAT {
                return Err(ProtocolError::UnsupportedFormat {
                    expected: CHANGESET_FORMAT.to_string(),
                    found: format.clone(),
                });
            }
        }
        if let Some(declared) = self.change_count {
            if declared != self.changes.len() {
                return Err(ProtocolError::CountMismatch { declared, actual: self.changes.len() });
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry() -> ChangeEntry {
        ChangeEntry {
            table: "items".into(),
            pk: "01".into(),
            cid: "title".into(),
            val: json!("t"),
            col_version: 1,
            db_version: 2,
            site_id: None,
            cl: 1,
            seq: 0,
        }
    }

    #[test]
    fn status_wire_shape() {
        let s = StatusResponse::new(SiteId::from_bytes([0xab; 16]), 7, &ProtocolDescriptor::current());
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["site_id"], json!("ab".repeat(16)));
        assert_eq!(v["db_version"], json!(7));
        assert_eq!(v["protocol"]["version"], json!(1));
        assert_eq!(v["protocol"]["format"], json!("lestash-crsqlite-v1"));
        assert_eq!(v["protocol"]["sync_tables"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn legacy_engine_field_accepted() {
        let raw = json!({
            "site_id": "00".repeat(16),
            "db_version": 3,
            "protocol": {
                "version": 1,
                "format": "lestash-crsqlite-v1",
                "schema_version": 3,
                "crsqlite_version": "0.16.3",
                "sync_tables": ["items", "tags"]
            }
        });
        let s: StatusResponse = serde_json::from_value(raw).unwrap();
        let d = s.protocol.to_descriptor();
        assert_eq!(d.merge_engine_version, "0.16.3");
        assert!(d.replicates("tags"));
        assert!(!d.replicates("sources"));
    }

    #[test]
    fn descriptor_round_trips_through_info() {
        let d = ProtocolDescriptor::current();
        assert_eq!(ProtocolInfo::from(&d).to_descriptor(), d);
    }

    #[test]
    fn bare_changes_body_is_valid() {
        let r: ChangesResponse = serde_json::from_value(json!({ "changes": [] })).unwrap();
        assert!(r.db_version.is_none());
        assert!(r.validate().is_ok());
    }

    #[test]
    fn envelope_validation() {
        let mut r = ChangesResponse::new(SiteId::from_bytes([1; 16]), 4, 0, vec![entry()]);
        assert!(r.validate().is_ok());
        r.change_count = Some(2);
        assert!(matches!(r.validate(), Err(ProtocolError::CountMismatch { declared: 2, actual: 1 })));
        r.change_count = None;
        r.format = Some("other".into());
        assert!(matches!(r.validate(), Err(ProtocolError::UnsupportedFormat { .. })));
    }

    #[test]
    fn export_document_parses_back() {
        let r = ChangesResponse::new(SiteId::from_bytes([1; 16]), 4, 1, vec![entry()]);
        let text = r.to_json_pretty().unwrap();
        assert_eq!(ChangesResponse::from_json(&text).unwrap(), r);
        assert!(ChangesResponse::from_json("{").is_err());
    }
}
