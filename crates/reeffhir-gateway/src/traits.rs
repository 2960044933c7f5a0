//! Backend contract for document clusters.
//!
//! Every database the server can run against implements [`DocumentCluster`];
//! the gateway is the only caller. Implementations must be thread-safe.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClusterError;
use crate::fts::{SearchHits, SearchRequest};

/// Fully qualified collection coordinates: `bucket.scope.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl CollectionRef {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

/// KV, N1QL, FTS, and transaction services of one cluster.
#[async_trait]
pub trait DocumentCluster: Send + Sync {
    /// KV get. `Ok(None)` when the key is absent.
    async fn kv_get(
        &self,
        loc: &CollectionRef,
        key: &str,
    ) -> Result<Option<Value>, ClusterError>;

    /// Batch KV get. Missing keys are skipped; present keys come back in the
    /// order requested.
    async fn kv_get_many(
        &self,
        loc: &CollectionRef,
        keys: &[String],
    ) -> Result<Vec<(String, Value)>, ClusterError>;

    /// KV insert; fails with [`ClusterError::DocumentExists`] on collision.
    async fn kv_insert(
        &self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError>;

    /// KV upsert.
    async fn kv_upsert(
        &self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError>;

    /// KV remove; fails with [`ClusterError::DocumentNotFound`] when absent.
    async fn kv_remove(&self, loc: &CollectionRef, key: &str) -> Result<(), ClusterError>;

    /// Run a N1QL statement against the bucket, returning result rows.
    async fn query(&self, bucket: &str, statement: &str) -> Result<Vec<Value>, ClusterError>;

    /// Run an FTS request against a named index, returning hit keys in index
    /// order plus the total match count.
    async fn fts_search(
        &self,
        bucket: &str,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchHits, ClusterError>;

    /// Begin a multi-document transaction scoped to the bucket.
    async fn begin(&self, bucket: &str) -> Result<Box<dyn DocumentTransaction>, ClusterError>;

    /// Lightweight connectivity probe.
    async fn ping(&self, bucket: &str) -> Result<(), ClusterError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// A multi-document transaction. All staged operations become visible
/// atomically on `commit`; `rollback` (or drop) discards them.
#[async_trait]
pub trait DocumentTransaction: Send + Sync {
    /// Read inside the transaction; sees staged writes.
    async fn get(&mut self, loc: &CollectionRef, key: &str)
    -> Result<Option<Value>, ClusterError>;

    /// Stage an insert; fails on existing key (staged or committed).
    async fn insert(
        &mut self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError>;

    /// Stage a replace of an existing document.
    async fn replace(
        &mut self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError>;

    /// Stage a removal of an existing document.
    async fn remove(&mut self, loc: &CollectionRef, key: &str) -> Result<(), ClusterError>;

    /// Commit every staged operation atomically.
    async fn commit(self: Box<Self>) -> Result<(), ClusterError>;

    /// Discard every staged operation.
    async fn rollback(self: Box<Self>) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_cluster_object_safe(_: &dyn DocumentCluster) {}
    fn _assert_transaction_object_safe(_: &dyn DocumentTransaction) {}

    #[test]
    fn collection_ref_display() {
        let loc = CollectionRef::new("demo", "Resources", "Patient");
        assert_eq!(loc.to_string(), "demo.Resources.Patient");
    }
}
