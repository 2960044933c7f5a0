use crate::error::{CoreError, Result};
use std::collections::BTreeMap;

/// Scope holding current resource documents.
pub const SCOPE_RESOURCES: &str = "Resources";
/// Scope holding version documents (one collection, `Versions`).
pub const SCOPE_VERSIONS: &str = "Versions";
/// Scope holding administrative documents (pagination cache).
pub const SCOPE_ADMIN: &str = "Admin";

/// Collection for version documents inside [`SCOPE_VERSIONS`].
pub const COLLECTION_VERSIONS: &str = "Versions";
/// Collection for pagination state inside [`SCOPE_ADMIN`].
pub const COLLECTION_CACHE: &str = "cache";

/// FTS index over the Versions collection.
pub const VERSIONS_INDEX: &str = "fts-versions";

/// Resource types co-located in the `Clinical` collection.
const CLINICAL_TYPES: &[&str] = &[
    "Observation",
    "Condition",
    "Encounter",
    "Procedure",
    "MedicationRequest",
    "AllergyIntolerance",
    "Immunization",
    "DiagnosticReport",
    "CarePlan",
];

/// Resource types routed to the `General` collection.
const GENERAL_TYPES: &[&str] = &[
    "Practitioner",
    "PractitionerRole",
    "Organization",
    "Location",
    "Medication",
    "Device",
    "RelatedPerson",
    "ServiceRequest",
    "Provenance",
];

/// Maps FHIR resource types to their storage collection and FTS index.
///
/// Several resource types co-locate in one collection to keep the index count
/// down; every FTS query therefore carries a term-match on `resourceType`.
/// The table is built once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct CollectionRouter {
    by_type: BTreeMap<String, String>,
}

impl CollectionRouter {
    /// Router over the built-in routing table.
    pub fn with_defaults() -> Self {
        let mut by_type = BTreeMap::new();
        by_type.insert("Patient".to_string(), "Patient".to_string());
        for t in CLINICAL_TYPES {
            by_type.insert((*t).to_string(), "Clinical".to_string());
        }
        for t in GENERAL_TYPES {
            by_type.insert((*t).to_string(), "General".to_string());
        }
        Self { by_type }
    }

    /// Router from an explicit `(resource type, collection)` table.
    pub fn from_table<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let by_type = entries
            .into_iter()
            .map(|(t, c)| (t.into(), c.into()))
            .collect();
        Self { by_type }
    }

    /// Collection (inside the `Resources` scope) holding this resource type.
    pub fn target_collection(&self, resource_type: &str) -> Result<&str> {
        self.by_type
            .get(resource_type)
            .map(String::as_str)
            .ok_or_else(|| {
                CoreError::invalid_request(format!("unknown resource type '{resource_type}'"))
            })
    }

    /// FTS index covering this resource type's collection.
    pub fn fts_index(&self, resource_type: &str) -> Result<String> {
        let collection = self.target_collection(resource_type)?;
        Ok(Self::index_for_collection(collection))
    }

    /// Deterministic index name for a collection.
    pub fn index_for_collection(collection: &str) -> String {
        format!("fts-{}", collection.to_lowercase())
    }

    /// All `(collection, index)` pairs, resource collections first, then the
    /// Versions collection. Used by provisioning checks and the test backend.
    pub fn all_indexes(&self) -> Vec<(String, String)> {
        let mut collections: Vec<&str> = self.by_type.values().map(String::as_str).collect();
        collections.sort_unstable();
        collections.dedup();
        let mut out: Vec<(String, String)> = collections
            .into_iter()
            .map(|c| (c.to_string(), Self::index_for_collection(c)))
            .collect();
        out.push((COLLECTION_VERSIONS.to_string(), VERSIONS_INDEX.to_string()));
        out
    }

    /// All routed resource types.
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }
}

impl Default for CollectionRouter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_routes_to_its_own_collection() {
        let router = CollectionRouter::with_defaults();
        assert_eq!(router.target_collection("Patient").unwrap(), "Patient");
        assert_eq!(router.fts_index("Patient").unwrap(), "fts-patient");
    }

    #[test]
    fn clinical_types_share_a_collection() {
        let router = CollectionRouter::with_defaults();
        assert_eq!(router.target_collection("Observation").unwrap(), "Clinical");
        assert_eq!(router.target_collection("Encounter").unwrap(), "Clinical");
        assert_eq!(router.fts_index("Condition").unwrap(), "fts-clinical");
    }

    #[test]
    fn unknown_type_is_invalid_request() {
        let router = CollectionRouter::with_defaults();
        let err = router.target_collection("Spaceship").unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[test]
    fn all_indexes_are_deduped_and_include_versions() {
        let router = CollectionRouter::with_defaults();
        let indexes = router.all_indexes();
        let names: Vec<&str> = indexes.iter().map(|(_, i)| i.as_str()).collect();
        assert!(names.contains(&"fts-patient"));
        assert!(names.contains(&"fts-clinical"));
        assert!(names.contains(&"fts-general"));
        assert!(names.contains(&VERSIONS_INDEX));
        assert_eq!(
            names.len(),
            names.iter().collect::<std::collections::BTreeSet<_>>().len()
        );
    }

    #[test]
    fn custom_table_overrides_defaults() {
        let router = CollectionRouter::from_table([("Basic", "Misc")]);
        assert_eq!(router.target_collection("Basic").unwrap(), "Misc");
        assert!(router.target_collection("Patient").is_err());
    }
}
