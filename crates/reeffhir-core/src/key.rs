//! Document key formats.
//!
//! Current documents live under `{ResourceType}/{id}`; version documents
//! under `{ResourceType}/{id}/{versionId}`.

use crate::error::{CoreError, Result};

/// Key of a current resource document.
pub fn resource_key(resource_type: &str, id: &str) -> String {
    format!("{resource_type}/{id}")
}

/// Key of a version document.
pub fn version_key(resource_type: &str, id: &str, version_id: u64) -> String {
    format!("{resource_type}/{id}/{version_id}")
}

/// Split a `{ResourceType}/{id}` key (also accepts reference strings of the
/// same shape).
pub fn parse_resource_key(key: &str) -> Result<(&str, &str)> {
    match key.split_once('/') {
        Some((resource_type, id)) if !resource_type.is_empty() && !id.is_empty() => {
            Ok((resource_type, id))
        }
        _ => Err(CoreError::invalid_request(format!(
            "malformed resource key '{key}'"
        ))),
    }
}
