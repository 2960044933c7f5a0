//! Off-heap pagination state.
//!
//! A completed search stores its full ordered key list under an opaque UUID
//! in the tenant's `Admin.cache` collection. The document is written exactly
//! once; page fetches only read it, and the collection's TTL cleans it up.
//! The next-page offset travels in the URL, never in the stored document.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reeffhir_core::router::{COLLECTION_CACHE, SCOPE_ADMIN};
use reeffhir_core::{CoreError, FhirInstant, Result};
use reeffhir_gateway::DbGateway;

/// What kind of search produced a stored key list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Regular,
    Include,
    Revinclude,
    Everything,
    Chain,
}

/// The immutable continuation state of one search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    #[serde(rename = "searchType")]
    pub search_type: SearchKind,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "allDocumentKeys")]
    pub all_document_keys: Vec<String>,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "primaryResourceCount")]
    pub primary_resource_count: usize,
    #[serde(rename = "createdAt")]
    pub created_at: FhirInstant,
}

/// Generate an opaque continuation token.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

pub struct PaginationCache {
    gateway: Arc<DbGateway>,
}

impl PaginationCache {
    pub fn new(gateway: Arc<DbGateway>) -> Self {
        Self { gateway }
    }

    /// Write the state once. Callers treat a failure as non-fatal: the first
    /// page is still served, just without a `next` link.
    pub async fn store(&self, tenant: &str, token: &str, state: &PageState) -> Result<()> {
        let doc = serde_json::to_value(state)?;
        self.gateway
            .collection(tenant, SCOPE_ADMIN, COLLECTION_CACHE)?
            .upsert(token, &doc)
            .await
    }

    /// Load continuation state. Anything that prevents the read — missing
    /// document, expired TTL, database failure — surfaces as `Gone`.
    pub async fn load(&self, tenant: &str, token: &str) -> Result<PageState> {
        let gone = || {
            CoreError::gone(format!(
                "pagination state for token '{token}' is missing or expired"
            ))
        };
        let doc = self
            .gateway
            .collection(tenant, SCOPE_ADMIN, COLLECTION_CACHE)?
            .get(token)
            .await
            .map_err(|_| gone())?
            .ok_or_else(gone)?;
        serde_json::from_value(doc).map_err(|_| gone())
    }
}
