//! Single entry point for every database call.
//!
//! All KV, N1QL, FTS, and transaction traffic flows through [`DbGateway`], so
//! the circuit breaker sees every outcome and can fail the whole process fast
//! when the cluster is unreachable. Health endpoints read the same state.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use reeffhir_core::{CoreError, FhirInstant, Result};

use crate::breaker::{Admission, CircuitBreaker};
use crate::error::ClusterError;
use crate::fts::{SearchHits, SearchRequest};
use crate::traits::{CollectionRef, DocumentCluster, DocumentTransaction};

/// Circuit-breaker-protected access point for a document cluster.
///
/// One instance per process; shared by all tenants and all requests.
pub struct DbGateway {
    cluster: Arc<dyn DocumentCluster>,
    breaker: Arc<CircuitBreaker>,
    tenants: BTreeSet<String>,
}

impl DbGateway {
    pub fn new(
        cluster: Arc<dyn DocumentCluster>,
        reset_timeout: Duration,
        tenants: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            cluster,
            breaker: Arc::new(CircuitBreaker::new(reset_timeout)),
            tenants: tenants.into_iter().collect(),
        }
    }

    /// Reject requests naming a bucket this deployment does not serve.
    fn ensure_tenant(&self, tenant: &str) -> Result<()> {
        if self.tenants.contains(tenant) {
            Ok(())
        } else {
            Err(CoreError::not_found("Tenant", tenant))
        }
    }

    async fn guard<T>(
        breaker: &CircuitBreaker,
        call: impl Future<Output = std::result::Result<T, ClusterError>>,
    ) -> Result<T> {
        match breaker.admit() {
            Admission::Rejected => {
                return Err(CoreError::database_unavailable("circuit open"));
            }
            Admission::Allowed | Admission::Probe => {}
        }
        match call.await {
            Ok(value) => {
                breaker.on_success();
                Ok(value)
            }
            Err(err) => {
                breaker.on_failure(&err);
                Err(err.into())
            }
        }
    }

    /// Run a N1QL statement.
    pub async fn query(&self, tenant: &str, statement: &str) -> Result<Vec<Value>> {
        self.ensure_tenant(tenant)?;
        Self::guard(&self.breaker, self.cluster.query(tenant, statement)).await
    }

    /// Run an FTS request against a named index.
    pub async fn search_query(
        &self,
        tenant: &str,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchHits> {
        self.ensure_tenant(tenant)?;
        Self::guard(&self.breaker, self.cluster.fts_search(tenant, index, request)).await
    }

    /// KV handle for a collection. Every call through the handle re-checks
    /// the breaker, so KV traffic fails fast while the circuit is open.
    pub fn collection(&self, tenant: &str, scope: &str, collection: &str) -> Result<CollectionHandle> {
        self.ensure_tenant(tenant)?;
        Ok(CollectionHandle {
            cluster: Arc::clone(&self.cluster),
            breaker: Arc::clone(&self.breaker),
            loc: CollectionRef::new(tenant, scope, collection),
        })
    }

    /// Begin a multi-document transaction for the tenant's bucket.
    pub async fn cluster_for_transaction(
        &self,
        tenant: &str,
    ) -> Result<Box<dyn DocumentTransaction>> {
        self.ensure_tenant(tenant)?;
        Self::guard(&self.breaker, self.cluster.begin(tenant)).await
    }

    /// Active connectivity probe; records the outcome on the breaker.
    pub async fn is_available(&self, tenant: &str) -> bool {
        if self.ensure_tenant(tenant).is_err() {
            return false;
        }
        Self::guard(&self.breaker, self.cluster.ping(tenant)).await.is_ok()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    /// Timestamp of the last connectivity failure, for the health detail view.
    pub fn last_failure_at(&self) -> Option<FhirInstant> {
        self.breaker.last_failure_ms().and_then(|ms| {
            time::OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
                .ok()
                .map(FhirInstant::new)
        })
    }

    /// Known tenant buckets, in order.
    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.tenants.iter().map(String::as_str)
    }

    pub fn backend_name(&self) -> &'static str {
        self.cluster.backend_name()
    }
}

/// Breaker-checked KV operations on one collection.
pub struct CollectionHandle {
    cluster: Arc<dyn DocumentCluster>,
    breaker: Arc<CircuitBreaker>,
    loc: CollectionRef,
}

impl CollectionHandle {
    pub fn location(&self) -> &CollectionRef {
        &self.loc
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        DbGateway::guard(&self.breaker, self.cluster.kv_get(&self.loc, key)).await
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<(String, Value)>> {
        DbGateway::guard(&self.breaker, self.cluster.kv_get_many(&self.loc, keys)).await
    }

    pub async fn insert(&self, key: &str, doc: &Value) -> Result<()> {
        DbGateway::guard(&self.breaker, self.cluster.kv_insert(&self.loc, key, doc)).await
    }

    pub async fn upsert(&self, key: &str, doc: &Value) -> Result<()> {
        DbGateway::guard(&self.breaker, self.cluster.kv_upsert(&self.loc, key, doc)).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        DbGateway::guard(&self.breaker, self.cluster.kv_remove(&self.loc, key)).await
    }
}
