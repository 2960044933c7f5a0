//! In-memory document cluster.
//!
//! Buckets → scopes → collections over ordered maps, so FTS hit order is
//! deterministic. Supports per-collection TTL (used by `Admin.cache`), the
//! FTS evaluator, the N1QL subset the query builder emits, single-writer
//! transactions, and an `offline` switch that turns every call into a
//! connectivity-class failure for circuit-breaker tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use time::OffsetDateTime;

use reeffhir_gateway::{
    ClusterError, CollectionRef, DocumentCluster, DocumentTransaction, SearchHits, SearchRequest,
};

use crate::eval;
use crate::n1ql;
use crate::transaction::MemoryTransaction;

#[derive(Debug, Clone)]
pub(crate) struct StoredDoc {
    pub value: Value,
    pub expires_at: Option<OffsetDateTime>,
}

impl StoredDoc {
    fn live(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|e| e > now)
    }
}

pub(crate) type CollectionMap = BTreeMap<String, StoredDoc>;
pub(crate) type ScopeKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct ClusterState {
    pub buckets: RwLock<BTreeMap<String, BTreeMap<ScopeKey, CollectionMap>>>,
    /// FTS index name → (scope, collection) within any bucket.
    indexes: RwLock<BTreeMap<String, ScopeKey>>,
    /// Per-(scope, collection) document TTL.
    ttls: RwLock<BTreeMap<ScopeKey, Duration>>,
    offline: AtomicBool,
}

impl ClusterState {
    pub(crate) fn check_online(&self) -> Result<(), ClusterError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ClusterError::connection_lost("cluster offline"))
        } else {
            Ok(())
        }
    }

    fn scope_key(loc: &CollectionRef) -> ScopeKey {
        (loc.scope.clone(), loc.collection.clone())
    }

    fn ttl_for(&self, loc: &CollectionRef) -> Option<Duration> {
        self.ttls
            .read()
            .unwrap()
            .get(&Self::scope_key(loc))
            .copied()
    }
}

/// Test/development stand-in for the document database.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an FTS index over `scope.collection` (applies to every
    /// bucket; bucket provisioning is uniform across tenants).
    pub fn register_index(
        &self,
        name: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) {
        self.state
            .indexes
            .write()
            .unwrap()
            .insert(name.into(), (scope.into(), collection.into()));
    }

    /// Set the document TTL of `scope.collection` (the `maxTTL` the real
    /// database enforces on `Admin.cache`).
    pub fn set_collection_ttl(
        &self,
        scope: impl Into<String>,
        collection: impl Into<String>,
        ttl: Duration,
    ) {
        self.state
            .ttls
            .write()
            .unwrap()
            .insert((scope.into(), collection.into()), ttl);
    }

    /// Switch the whole cluster on or off. While offline every call fails
    /// with a connectivity-class error.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    fn with_collection<T>(
        &self,
        loc: &CollectionRef,
        f: impl FnOnce(&CollectionMap, OffsetDateTime) -> T,
    ) -> T {
        let buckets = self.state.buckets.read().unwrap();
        let now = OffsetDateTime::now_utc();
        static EMPTY: std::sync::OnceLock<CollectionMap> = std::sync::OnceLock::new();
        let empty = EMPTY.get_or_init(CollectionMap::new);
        let map = buckets
            .get(&loc.bucket)
            .and_then(|scopes| scopes.get(&ClusterState::scope_key(loc)))
            .unwrap_or(empty);
        f(map, now)
    }

    fn with_collection_mut<T>(
        &self,
        loc: &CollectionRef,
        f: impl FnOnce(&mut CollectionMap, OffsetDateTime) -> T,
    ) -> T {
        let mut buckets = self.state.buckets.write().unwrap();
        let now = OffsetDateTime::now_utc();
        let map = buckets
            .entry(loc.bucket.clone())
            .or_default()
            .entry(ClusterState::scope_key(loc))
            .or_default();
        f(map, now)
    }

    /// Evaluate an FTS request against the collection its index covers.
    /// Shared by the FTS service and the recognized N1QL shapes.
    fn run_search(
        &self,
        bucket: &str,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchHits, ClusterError> {
        let scope_key = self
            .state
            .indexes
            .read()
            .unwrap()
            .get(index)
            .cloned()
            .ok_or_else(|| ClusterError::IndexNotFound(index.to_string()))?;

        let loc = CollectionRef::new(bucket, scope_key.0, scope_key.1);
        let mut matched: Vec<(String, Value)> = self.with_collection(&loc, |map, now| {
            map.iter()
                .filter(|(_, doc)| doc.live(now))
                .filter(|(_, doc)| eval::matches(&request.query, &doc.value))
                .map(|(key, doc)| (key.clone(), doc.value.clone()))
                .collect()
        });

        if !request.sort.is_empty() {
            matched.sort_by(|(_, a), (_, b)| {
                for spec in &request.sort {
                    let ka = eval::sort_key(a, &spec.field);
                    let kb = eval::sort_key(b, &spec.field);
                    // Missing sort values order last, regardless of direction.
                    let ord = match (ka, kb) {
                        (Some(a), Some(b)) => {
                            if spec.descending {
                                b.cmp(&a)
                            } else {
                                a.cmp(&b)
                            }
                        }
                        (Some(_), None) => std::cmp::Ordering::Less,
                        (None, Some(_)) => std::cmp::Ordering::Greater,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let total = matched.len() as u64;
        let keys = matched
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|(key, _)| key)
            .collect();
        Ok(SearchHits { keys, total })
    }

    pub(crate) fn state(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state)
    }
}

#[async_trait]
impl DocumentCluster for MemoryCluster {
    async fn kv_get(
        &self,
        loc: &CollectionRef,
        key: &str,
    ) -> Result<Option<Value>, ClusterError> {
        self.state.check_online()?;
        Ok(self.with_collection(loc, |map, now| {
            map.get(key)
                .filter(|doc| doc.live(now))
                .map(|doc| doc.value.clone())
        }))
    }

    async fn kv_get_many(
        &self,
        loc: &CollectionRef,
        keys: &[String],
    ) -> Result<Vec<(String, Value)>, ClusterError> {
        self.state.check_online()?;
        Ok(self.with_collection(loc, |map, now| {
            keys.iter()
                .filter_map(|key| {
                    map.get(key)
                        .filter(|doc| doc.live(now))
                        .map(|doc| (key.clone(), doc.value.clone()))
                })
                .collect()
        }))
    }

    async fn kv_insert(
        &self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError> {
        self.state.check_online()?;
        let ttl = self.state.ttl_for(loc);
        self.with_collection_mut(loc, |map, now| {
            if map.get(key).is_some_and(|existing| existing.live(now)) {
                return Err(ClusterError::document_exists(key));
            }
            map.insert(
                key.to_string(),
                StoredDoc {
                    value: doc.clone(),
                    expires_at: ttl.map(|t| now + t),
                },
            );
            Ok(())
        })
    }

    async fn kv_upsert(
        &self,
        loc: &CollectionRef,
        key: &str,
        doc: &Value,
    ) -> Result<(), ClusterError> {
        self.state.check_online()?;
        let ttl = self.state.ttl_for(loc);
        self.with_collection_mut(loc, |map, now| {
            map.insert(
                key.to_string(),
                StoredDoc {
                    value: doc.clone(),
                    expires_at: ttl.map(|t| now + t),
                },
            );
        });
        Ok(())
    }

    async fn kv_remove(&self, loc: &CollectionRef, key: &str) -> Result<(), ClusterError> {
        self.state.check_online()?;
        self.with_collection_mut(loc, |map, now| {
            match map.remove(key) {
                Some(doc) if doc.live(now) => Ok(()),
                _ => Err(ClusterError::document_not_found(key)),
            }
        })
    }

    async fn query(&self, bucket: &str, statement: &str) -> Result<Vec<Value>, ClusterError> {
        self.state.check_online()?;
        let parsed = n1ql::parse_search_statement(statement).ok_or_else(|| {
            ClusterError::QuerySyntax(format!("unsupported statement: {statement}"))
        })?;
        if parsed.bucket != bucket {
            return Err(ClusterError::QuerySyntax(format!(
                "statement targets bucket '{}', query was issued against '{bucket}'",
                parsed.bucket
            )));
        }
        let hits = self.run_search(bucket, &parsed.index, &parsed.request)?;
        match parsed.projection {
            n1ql::Projection::Count => Ok(vec![json!({"total": hits.total})]),
            n1ql::Projection::Ids => {
                Ok(hits.keys.into_iter().map(|id| json!({"id": id})).collect())
            }
            n1ql::Projection::Documents => {
                let loc = CollectionRef::new(bucket, parsed.scope, parsed.collection);
                Ok(self.with_collection(&loc, |map, now| {
                    hits.keys
                        .iter()
                        .filter_map(|key| {
                            map.get(key)
                                .filter(|doc| doc.live(now))
                                .map(|doc| doc.value.clone())
                        })
                        .collect()
                }))
            }
        }
    }

    async fn fts_search(
        &self,
        bucket: &str,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchHits, ClusterError> {
        self.state.check_online()?;
        self.run_search(bucket, index, request)
    }

    async fn begin(&self, bucket: &str) -> Result<Box<dyn DocumentTransaction>, ClusterError> {
        self.state.check_online()?;
        Ok(Box::new(MemoryTransaction::new(self.state(), bucket)))
    }

    async fn ping(&self, _bucket: &str) -> Result<(), ClusterError> {
        self.state.check_online()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reeffhir_gateway::QueryNode;

    fn loc() -> CollectionRef {
        CollectionRef::new("demo", "Resources", "Patient")
    }

    fn patient(id: &str, family: &str) -> Value {
        json!({
            "resourceType": "Patient",
            "id": id,
            "name": [{"family": family}],
            "meta": {"versionId": "1", "lastUpdated": "2025-01-01T00:00:00Z"}
        })
    }

    #[tokio::test]
    async fn kv_round_trip() {
        let cluster = MemoryCluster::new();
        let doc = patient("p1", "Smith");
        cluster.kv_insert(&loc(), "Patient/p1", &doc).await.unwrap();
        let read = cluster.kv_get(&loc(), "Patient/p1").await.unwrap().unwrap();
        assert_eq!(read, doc);

        let err = cluster.kv_insert(&loc(), "Patient/p1", &doc).await.unwrap_err();
        assert!(matches!(err, ClusterError::DocumentExists { .. }));

        cluster.kv_remove(&loc(), "Patient/p1").await.unwrap();
        assert!(cluster.kv_get(&loc(), "Patient/p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_get_preserves_order_and_skips_missing() {
        let cluster = MemoryCluster::new();
        for id in ["a", "b", "c"] {
            cluster
                .kv_insert(&loc(), &format!("Patient/{id}"), &patient(id, "X"))
                .await
                .unwrap();
        }
        let keys = vec![
            "Patient/c".to_string(),
            "Patient/missing".to_string(),
            "Patient/a".to_string(),
        ];
        let docs = cluster.kv_get_many(&loc(), &keys).await.unwrap();
        let got: Vec<&str> = docs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(got, vec!["Patient/c", "Patient/a"]);
    }

    #[tokio::test]
    async fn fts_returns_keys_in_key_order() {
        let cluster = MemoryCluster::new();
        cluster.register_index("fts-patient", "Resources", "Patient");
        for id in ["c", "a", "b"] {
            cluster
                .kv_insert(&loc(), &format!("Patient/{id}"), &patient(id, "Smith"))
                .await
                .unwrap();
        }
        let request = SearchRequest::new(QueryNode::term("resourceType", "Patient"), 10);
        let hits = cluster.fts_search("demo", "fts-patient", &request).await.unwrap();
        assert_eq!(hits.total, 3);
        assert_eq!(hits.keys, vec!["Patient/a", "Patient/b", "Patient/c"]);
    }

    #[tokio::test]
    async fn fts_paging_and_count() {
        let cluster = MemoryCluster::new();
        cluster.register_index("fts-patient", "Resources", "Patient");
        for i in 0..5 {
            cluster
                .kv_insert(
                    &loc(),
                    &format!("Patient/p{i}"),
                    &patient(&format!("p{i}"), "Smith"),
                )
                .await
                .unwrap();
        }
        let request = SearchRequest::new(QueryNode::term("resourceType", "Patient"), 2)
            .with_from(2);
        let hits = cluster.fts_search("demo", "fts-patient", &request).await.unwrap();
        assert_eq!(hits.total, 5);
        assert_eq!(hits.keys, vec!["Patient/p2", "Patient/p3"]);

        let count = request.count_shape();
        let hits = cluster.fts_search("demo", "fts-patient", &count).await.unwrap();
        assert!(hits.keys.is_empty());
        assert_eq!(hits.total, 5);
    }

    #[tokio::test]
    async fn fts_sort_descending() {
        let cluster = MemoryCluster::new();
        cluster.register_index("fts-patient", "Resources", "Patient");
        for (id, family) in [("1", "Adams"), ("2", "Zorn"), ("3", "Miller")] {
            cluster
                .kv_insert(&loc(), &format!("Patient/{id}"), &patient(id, family))
                .await
                .unwrap();
        }
        let request = SearchRequest::new(QueryNode::term("resourceType", "Patient"), 10)
            .with_sort(vec![reeffhir_gateway::SortSpec::desc("name.family")]);
        let hits = cluster.fts_search("demo", "fts-patient", &request).await.unwrap();
        assert_eq!(hits.keys, vec!["Patient/2", "Patient/3", "Patient/1"]);
    }

    #[tokio::test]
    async fn unknown_index_errors() {
        let cluster = MemoryCluster::new();
        let request = SearchRequest::new(QueryNode::MatchAll, 10);
        let err = cluster.fts_search("demo", "fts-nope", &request).await.unwrap_err();
        assert!(matches!(err, ClusterError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn query_supports_the_builder_statement_shapes() {
        let cluster = MemoryCluster::new();
        cluster.register_index("fts-patient", "Resources", "Patient");
        for id in ["a", "b"] {
            cluster
                .kv_insert(&loc(), &format!("Patient/{id}"), &patient(id, "Smith"))
                .await
                .unwrap();
        }
        let request = SearchRequest::new(QueryNode::term("resourceType", "Patient"), 10);
        let search_json = request.to_json();

        let ids = cluster
            .query(
                "demo",
                &format!(
                    "SELECT META(res).id AS id FROM `demo`.`Resources`.`Patient` AS res WHERE SEARCH(res, {search_json}, {{\"index\": \"fts-patient\"}})"
                ),
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0]["id"], "Patient/a");

        let counts = cluster
            .query(
                "demo",
                &format!(
                    "SELECT COUNT(*) AS total FROM `demo`.`Resources`.`Patient` AS res WHERE SEARCH(res, {search_json}, {{\"index\": \"fts-patient\"}})"
                ),
            )
            .await
            .unwrap();
        assert_eq!(counts[0]["total"], 2);

        let docs = cluster
            .query(
                "demo",
                &format!(
                    "SELECT RAW res FROM `demo`.`Resources`.`Patient` AS res WHERE SEARCH(res, {search_json}, {{\"index\": \"fts-patient\"}})"
                ),
            )
            .await
            .unwrap();
        assert_eq!(docs[0]["resourceType"], "Patient");

        let err = cluster.query("demo", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, ClusterError::QuerySyntax(_)));
    }

    #[tokio::test]
    async fn ttl_expires_documents() {
        let cluster = MemoryCluster::new();
        cluster.set_collection_ttl("Admin", "cache", Duration::from_millis(0));
        let cache = CollectionRef::new("demo", "Admin", "cache");
        cluster
            .kv_upsert(&cache, "token-1", &json!({"allDocumentKeys": []}))
            .await
            .unwrap();
        // TTL of zero: expired immediately.
        assert!(cluster.kv_get(&cache, "token-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_switch_yields_connectivity_errors() {
        let cluster = MemoryCluster::new();
        cluster.set_offline(true);
        let err = cluster.kv_get(&loc(), "Patient/p1").await.unwrap_err();
        assert!(err.is_connectivity());
        let err = cluster.ping("demo").await.unwrap_err();
        assert!(err.is_connectivity());

        cluster.set_offline(false);
        assert!(cluster.ping("demo").await.is_ok());
    }
}
