//! Peer registration validation.
//!
//! Valid registrations:
//! - Name is non-empty, at most 64 characters, with no control characters
//! - Address is a bare host name or IP literal: no scheme, path, or whitespace
//! - Port is non-zero

use lestash_types::NewPeer;

use crate::error::{RegistryError, RegistryResult};

/// Longest accepted peer name.
pub const MAX_NAME_LEN: usize = 64;

fn invalid(field: &'static str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidPeer { field, reason: reason.into() }
}

/// Validate a peer name.
pub fn validate_name(name: &str) -> RegistryResult<()> {
    if name.trim().is_empty() {
        return Err(invalid("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid("name", format!("must be at most {MAX_NAME_LEN} characters")));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("name", "must not contain control characters"));
    }
    Ok(())
}

/// Validate a peer address.
///
/// IPv6 literals may be given with or without brackets.
pub fn validate_address(address: &str) -> RegistryResult<()> {
    if address.is_empty() {
        return Err(invalid("address", "must not be empty"));
    }
    if address.contains("://") {
        return Err(invalid("address", "must be a host, not a URL"));
    }
    if address.chars().any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#') {
        return Err(invalid("address", format!("contains forbidden character in {address:?}")));
    }
    let inner = address
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(address);
    if inner.contains('[') || inner.contains(']') {
        return Err(invalid("address", "unbalanced brackets"));
    }
    Ok(())
}

pub fn validate_port(port: u16) -> RegistryResult<()> {
    if port == 0 {
        return Err(invalid("port", "must be non-zero"));
    }
    Ok(())
}

/// Validate a full registration request.
pub fn validate_new_peer(peer: &NewPeer) -> RegistryResult<()> {
    validate_name(&peer.name)?;
    validate_address(&peer.address)?;
    validate_port(peer.port)
}
