//! Resource lifecycle over multi-document transactions.
//!
//! Every write touches two collections atomically: the current document in
//! `Resources` and its mirror in `Versions` under `{type}/{id}/{versionId}`.
//! After each write the Versions collection holds every version `1..=N` with
//! no gaps; deletion appends a tombstone version and removes the current
//! document. Conflicting writers are serialized by the database transaction;
//! losers retry a bounded number of times with jitter before surfacing 409.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use reeffhir_core::router::{
    COLLECTION_VERSIONS, CollectionRouter, SCOPE_RESOURCES, SCOPE_VERSIONS, VERSIONS_INDEX,
};
use reeffhir_core::time::format_rfc3339;
use reeffhir_core::{CoreError, Result, now_utc, resource_key};
use reeffhir_gateway::{CollectionRef, DbGateway, DocumentTransaction, QueryNode};
use reeffhir_search::FtsQueryBuilder;

const MAX_CONFLICT_RETRIES: u32 = 3;
/// Cap on version documents pulled for one history request.
const HISTORY_FTS_LIMIT: usize = 1_000;

pub struct ResourceStore {
    gateway: Arc<DbGateway>,
    router: Arc<CollectionRouter>,
}

/// Outcome of an update-or-create (`PUT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created,
    Updated,
}

impl ResourceStore {
    pub fn new(gateway: Arc<DbGateway>, router: Arc<CollectionRouter>) -> Self {
        Self { gateway, router }
    }

    pub(crate) fn gateway(&self) -> &Arc<DbGateway> {
        &self.gateway
    }

    fn resources_loc(&self, tenant: &str, resource_type: &str) -> Result<CollectionRef> {
        let collection = self.router.target_collection(resource_type)?;
        Ok(CollectionRef::new(tenant, SCOPE_RESOURCES, collection))
    }

    fn versions_loc(tenant: &str) -> CollectionRef {
        CollectionRef::new(tenant, SCOPE_VERSIONS, COLLECTION_VERSIONS)
    }

    /// Create a resource (`POST`). The caller may have supplied an id; when
    /// absent a server id is assigned. Fails with conflict if the id exists.
    pub async fn create(&self, tenant: &str, resource_type: &str, body: Value) -> Result<Value> {
        let mut tx = self.gateway.cluster_for_transaction(tenant).await?;
        let stored = self
            .create_in_tx(tx.as_mut(), tenant, resource_type, body)
            .await;
        match stored {
            Ok(doc) => {
                tx.commit().await.map_err(CoreError::from)?;
                Ok(doc)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Create inside an existing transaction (bundle processing).
    pub(crate) async fn create_in_tx(
        &self,
        tx: &mut dyn DocumentTransaction,
        tenant: &str,
        resource_type: &str,
        mut body: Value,
    ) -> Result<Value> {
        validate_body(resource_type, &body)?;
        let id = match body.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        stamp(&mut body, resource_type, &id, 1);

        let resources = self.resources_loc(tenant, resource_type)?;
        let versions = Self::versions_loc(tenant);
        let key = resource_key(resource_type, &id);

        tx.insert(&resources, &key, &body)
            .await
            .map_err(CoreError::from)?;
        tx.insert(&versions, &format!("{key}/1"), &body)
            .await
            .map_err(CoreError::from)?;
        Ok(body)
    }

    /// Direct KV read of the current document. Tombstoned resources return
    /// `Gone`, absent ones `NotFound`.
    pub async fn read(&self, tenant: &str, resource_type: &str, id: &str) -> Result<Value> {
        let handle = self.gateway.collection(
            tenant,
            SCOPE_RESOURCES,
            self.router.target_collection(resource_type)?,
        )?;
        if let Some(doc) = handle.get(&resource_key(resource_type, id)).await? {
            return Ok(doc);
        }
        match self.latest_version(tenant, resource_type, id).await? {
            Some(latest) if latest.get("deleted").and_then(Value::as_bool) == Some(true) => {
                Err(CoreError::gone(format!("{resource_type}/{id} was deleted")))
            }
            _ => Err(CoreError::not_found(resource_type, id)),
        }
    }

    /// Update-or-create (`PUT`).
    pub async fn update(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        body: Value,
    ) -> Result<(Value, UpdateOutcome)> {
        validate_body(resource_type, &body)?;
        if let Some(body_id) = body.get("id").and_then(Value::as_str) {
            if body_id != id {
                return Err(CoreError::invalid_request(format!(
                    "body id '{body_id}' does not match URL id '{id}'"
                )));
            }
        }

        self.with_conflict_retry(|| async {
            let mut tx = self.gateway.cluster_for_transaction(tenant).await?;
            let result = self
                .update_in_tx(tx.as_mut(), tenant, resource_type, id, body.clone())
                .await;
            match result {
                Ok(outcome) => {
                    tx.commit().await.map_err(CoreError::from)?;
                    Ok(outcome)
                }
                Err(err) => {
                    let _ = tx.rollback().await;
                    Err(err)
                }
            }
        })
        .await
    }

    pub(crate) async fn update_in_tx(
        &self,
        tx: &mut dyn DocumentTransaction,
        tenant: &str,
        resource_type: &str,
        id: &str,
        mut body: Value,
    ) -> Result<(Value, UpdateOutcome)> {
        let resources = self.resources_loc(tenant, resource_type)?;
        let versions = Self::versions_loc(tenant);
        let key = resource_key(resource_type, id);

        let current = tx.get(&resources, &key).await.map_err(CoreError::from)?;
        let (next_version, outcome) = match &current {
            Some(doc) => (current_version(doc)? + 1, UpdateOutcome::Updated),
            None => {
                // A tombstoned resource revives at the next version; a brand
                // new id starts at 1.
                match self.latest_version(tenant, resource_type, id).await? {
                    Some(latest) => (current_version(&latest)? + 1, UpdateOutcome::Updated),
                    None => (1, UpdateOutcome::Created),
                }
            }
        };

        stamp(&mut body, resource_type, id, next_version);
        if current.is_some() {
            tx.replace(&resources, &key, &body)
                .await
                .map_err(CoreError::from)?;
        } else {
            tx.insert(&resources, &key, &body)
                .await
                .map_err(CoreError::from)?;
        }
        tx.insert(&versions, &format!("{key}/{next_version}"), &body)
            .await
            .map_err(CoreError::from)?;
        Ok((body, outcome))
    }

    /// Apply an RFC 6902 patch to the current body, then commit the result
    /// as a normal version bump.
    pub async fn patch(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        patch: &json_patch::Patch,
    ) -> Result<Value> {
        let mut body = self.read(tenant, resource_type, id).await?;
        json_patch::patch(&mut body, patch)
            .map_err(|e| CoreError::invalid_request(format!("patch failed: {e}")))?;
        if body.get("resourceType").and_then(Value::as_str) != Some(resource_type) {
            return Err(CoreError::invalid_request(
                "patch may not change resourceType",
            ));
        }
        if let Some(patched_id) = body.get("id").and_then(Value::as_str) {
            if patched_id != id {
                return Err(CoreError::invalid_request("patch may not change id"));
            }
        }
        let (stored, _) = self.update(tenant, resource_type, id, body).await?;
        Ok(stored)
    }

    /// Delete (`DELETE`): append a tombstone version and drop the current
    /// document. Deleting an already-tombstoned resource is idempotent.
    pub async fn delete(&self, tenant: &str, resource_type: &str, id: &str) -> Result<()> {
        self.with_conflict_retry(|| async {
            let mut tx = self.gateway.cluster_for_transaction(tenant).await?;
            let result = self
                .delete_in_tx(tx.as_mut(), tenant, resource_type, id)
                .await;
            match result {
                Ok(()) => {
                    tx.commit().await.map_err(CoreError::from)?;
                    Ok(())
                }
                Err(err) => {
                    let _ = tx.rollback().await;
                    Err(err)
                }
            }
        })
        .await
    }

    pub(crate) async fn delete_in_tx(
        &self,
        tx: &mut dyn DocumentTransaction,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<()> {
        let resources = self.resources_loc(tenant, resource_type)?;
        let versions = Self::versions_loc(tenant);
        let key = resource_key(resource_type, id);

        let current = tx.get(&resources, &key).await.map_err(CoreError::from)?;
        let Some(current) = current else {
            return match self.latest_version(tenant, resource_type, id).await? {
                Some(latest) if latest.get("deleted").and_then(Value::as_bool) == Some(true) => {
                    Ok(())
                }
                _ => Err(CoreError::not_found(resource_type, id)),
            };
        };

        let next_version = current_version(&current)? + 1;
        let tombstone = json!({
            "resourceType": resource_type,
            "id": id,
            "deleted": true,
            "meta": {
                "versionId": next_version.to_string(),
                "lastUpdated": now_utc().to_string(),
            }
        });
        tx.insert(&versions, &format!("{key}/{next_version}"), &tombstone)
            .await
            .map_err(CoreError::from)?;
        tx.remove(&resources, &key).await.map_err(CoreError::from)?;
        Ok(())
    }

    /// Read one specific version (`vread`). Tombstone versions are returned
    /// as stored; absent versions are `NotFound`.
    pub async fn vread(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<Value> {
        let handle = self
            .gateway
            .collection(tenant, SCOPE_VERSIONS, COLLECTION_VERSIONS)?;
        handle
            .get(&format!("{}/{version_id}", resource_key(resource_type, id)))
            .await?
            .ok_or_else(|| CoreError::not_found(resource_type, format!("{id}/_history/{version_id}")))
    }

    /// Ordered version documents for one resource, newest first. `since`
    /// filters on `meta.lastUpdated`; `count` limits the result.
    pub async fn history(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
        since: Option<&str>,
        count: usize,
    ) -> Result<Vec<Value>> {
        let mut builder = FtsQueryBuilder::new(resource_type, HISTORY_FTS_LIMIT);
        builder.push(QueryNode::term("id", id));
        if let Some(since) = since {
            let range = reeffhir_core::time::parse_date_literal(since)?;
            builder.push(QueryNode::DateRange {
                field: "meta.lastUpdated".to_string(),
                start: Some(format_rfc3339(range.start)),
                end: None,
                inclusive_start: true,
                inclusive_end: true,
            });
        }
        let hits = self
            .gateway
            .search_query(tenant, VERSIONS_INDEX, &builder.build_request())
            .await?;

        let handle = self
            .gateway
            .collection(tenant, SCOPE_VERSIONS, COLLECTION_VERSIONS)?;
        let mut docs: Vec<Value> = handle
            .get_many(&hits.keys)
            .await?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect();
        // FTS sorts lexicographically; version ordering is numeric.
        docs.sort_by_key(|doc| std::cmp::Reverse(current_version(doc).unwrap_or(0)));
        docs.truncate(count);
        Ok(docs)
    }

    /// Newest version document of a resource, if any exist.
    async fn latest_version(
        &self,
        tenant: &str,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Value>> {
        let mut builder = FtsQueryBuilder::new(resource_type, HISTORY_FTS_LIMIT);
        builder.push(QueryNode::term("id", id));
        let hits = self
            .gateway
            .search_query(tenant, VERSIONS_INDEX, &builder.build_request())
            .await?;
        if hits.keys.is_empty() {
            return Ok(None);
        }
        let handle = self
            .gateway
            .collection(tenant, SCOPE_VERSIONS, COLLECTION_VERSIONS)?;
        let docs = handle.get_many(&hits.keys).await?;
        Ok(docs
            .into_iter()
            .map(|(_, doc)| doc)
            .max_by_key(|doc| current_version(doc).unwrap_or(0)))
    }

    /// Run `op`, retrying bounded times with jitter when the transaction
    /// lost a write race. This is the only place conflicts are retried.
    async fn with_conflict_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(CoreError::Conflict {
                    resource_type,
                    id,
                    message,
                }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(
                        %resource_type,
                        %id,
                        attempt,
                        "transaction conflict, retrying: {message}"
                    );
                    let jitter = Duration::from_millis(10 + fastrand::u64(0..40));
                    tokio::time::sleep(jitter * attempt).await;
                }
                other => return other,
            }
        }
    }
}

/// Stamp identity and meta onto a body before write.
fn stamp(body: &mut Value, resource_type: &str, id: &str, version: u64) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    map.insert("resourceType".into(), json!(resource_type));
    map.insert("id".into(), json!(id));
    let meta = map.entry("meta").or_insert_with(|| json!({}));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("versionId".into(), json!(version.to_string()));
        meta.insert("lastUpdated".into(), json!(now_utc().to_string()));
    }
}

/// Parse `meta.versionId` from a stored document.
fn current_version(doc: &Value) -> Result<u64> {
    doc.get("meta")
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| CoreError::internal("stored document lacks a numeric meta.versionId"))
}

fn validate_body(resource_type: &str, body: &Value) -> Result<()> {
    if !body.is_object() {
        return Err(CoreError::invalid_request("resource body must be a JSON object"));
    }
    match body.get("resourceType").and_then(Value::as_str) {
        Some(t) if t == resource_type => Ok(()),
        Some(t) => Err(CoreError::invalid_request(format!(
            "body resourceType '{t}' does not match URL type '{resource_type}'"
        ))),
        None => Err(CoreError::invalid_request("body lacks resourceType")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reeffhir_db_memory::MemoryCluster;
    use reeffhir_gateway::DocumentCluster;

    struct Fixture {
        cluster: Arc<MemoryCluster>,
        store: ResourceStore,
    }

    fn fixture() -> Fixture {
        let cluster = Arc::new(MemoryCluster::new());
        let router = Arc::new(CollectionRouter::with_defaults());
        for (collection, index) in router.all_indexes() {
            let scope = if collection == COLLECTION_VERSIONS {
                SCOPE_VERSIONS
            } else {
                SCOPE_RESOURCES
            };
            cluster.register_index(index, scope, collection);
        }
        let gateway = Arc::new(DbGateway::new(
            Arc::clone(&cluster) as Arc<dyn DocumentCluster>,
            Duration::from_secs(30),
            ["demo".to_string()],
        ));
        Fixture {
            cluster,
            store: ResourceStore::new(gateway, router),
        }
    }

    fn smith() -> Value {
        json!({"resourceType": "Patient", "name": [{"family": "Smith"}]})
    }

    #[tokio::test]
    async fn create_stamps_version_one_and_mirrors() {
        let f = fixture();
        let created = f.store.create("demo", "Patient", smith()).await.unwrap();
        let id = created["id"].as_str().unwrap();
        assert_eq!(created["meta"]["versionId"], "1");
        assert!(created["meta"]["lastUpdated"].is_string());

        let versions = CollectionRef::new("demo", SCOPE_VERSIONS, COLLECTION_VERSIONS);
        let mirror = f
            .cluster
            .kv_get(&versions, &format!("Patient/{id}/1"))
            .await
            .unwrap();
        assert!(mirror.is_some());
    }

    #[tokio::test]
    async fn create_with_existing_id_conflicts() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body.clone()).await.unwrap();
        let err = f.store.create("demo", "Patient", body).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn read_round_trips_the_body() {
        let f = fixture();
        let created = f.store.create("demo", "Patient", smith()).await.unwrap();
        let id = created["id"].as_str().unwrap();
        let read = f.store.read("demo", "Patient", id).await.unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn read_of_unknown_id_is_not_found() {
        let f = fixture();
        let err = f.store.read("demo", "Patient", "nope").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_history() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();

        let jones = json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Jones"}]});
        let (updated, outcome) = f.store.update("demo", "Patient", "p1", jones).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);
        assert_eq!(updated["meta"]["versionId"], "2");

        let v1 = f.store.vread("demo", "Patient", "p1", "1").await.unwrap();
        assert_eq!(v1["name"][0]["family"], "Smith");
        let v2 = f.store.vread("demo", "Patient", "p1", "2").await.unwrap();
        assert_eq!(v2["name"][0]["family"], "Jones");
    }

    #[tokio::test]
    async fn put_to_unknown_id_creates() {
        let f = fixture();
        let body = json!({"resourceType": "Patient", "id": "fresh", "name": [{"family": "New"}]});
        let (stored, outcome) = f
            .store
            .update("demo", "Patient", "fresh", body)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Created);
        assert_eq!(stored["meta"]["versionId"], "1");
    }

    #[tokio::test]
    async fn delete_tombstones_and_gone() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();
        f.store.delete("demo", "Patient", "p1").await.unwrap();

        let err = f.store.read("demo", "Patient", "p1").await.unwrap_err();
        assert!(matches!(err, CoreError::Gone { .. }));

        // Prior versions still readable; the tombstone is version 2.
        let v1 = f.store.vread("demo", "Patient", "p1", "1").await.unwrap();
        assert_eq!(v1["name"][0]["family"], "Smith");
        let v2 = f.store.vread("demo", "Patient", "p1", "2").await.unwrap();
        assert_eq!(v2["deleted"], true);
        let err = f.store.vread("demo", "Patient", "p1", "3").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_tombstones() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();
        f.store.delete("demo", "Patient", "p1").await.unwrap();
        f.store.delete("demo", "Patient", "p1").await.unwrap();

        let err = f.store.delete("demo", "Patient", "never").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn put_revives_tombstoned_resource_without_gaps() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();
        f.store.delete("demo", "Patient", "p1").await.unwrap();

        let revived = json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Back"}]});
        let (stored, outcome) = f.store.update("demo", "Patient", "p1", revived).await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Updated);
        assert_eq!(stored["meta"]["versionId"], "3");

        // Versions 1..=3 all exist.
        for v in ["1", "2", "3"] {
            f.store.vread("demo", "Patient", "p1", v).await.unwrap();
        }
    }

    #[tokio::test]
    async fn patch_mutates_then_bumps() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();

        let patch: json_patch::Patch = serde_json::from_value(json!([
            {"op": "replace", "path": "/name/0/family", "value": "Patched"}
        ]))
        .unwrap();
        let stored = f.store.patch("demo", "Patient", "p1", &patch).await.unwrap();
        assert_eq!(stored["name"][0]["family"], "Patched");
        assert_eq!(stored["meta"]["versionId"], "2");
    }

    #[tokio::test]
    async fn patch_may_not_change_identity() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();

        let patch: json_patch::Patch = serde_json::from_value(json!([
            {"op": "replace", "path": "/id", "value": "other"}
        ]))
        .unwrap();
        let err = f.store.patch("demo", "Patient", "p1", &patch).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn history_is_ordered_newest_first() {
        let f = fixture();
        let mut body = smith();
        body["id"] = json!("p1");
        f.store.create("demo", "Patient", body).await.unwrap();
        for family in ["Second", "Third"] {
            let next = json!({"resourceType": "Patient", "id": "p1", "name": [{"family": family}]});
            f.store.update("demo", "Patient", "p1", next).await.unwrap();
        }
        f.store.delete("demo", "Patient", "p1").await.unwrap();

        let history = f
            .store
            .history("demo", "Patient", "p1", None, 50)
            .await
            .unwrap();
        assert_eq!(history.len(), 4);
        let versions: Vec<&str> = history
            .iter()
            .map(|d| d["meta"]["versionId"].as_str().unwrap())
            .collect();
        assert_eq!(versions, vec!["4", "3", "2", "1"]);
        assert_eq!(history[0]["deleted"], true);

        let limited = f
            .store
            .history("demo", "Patient", "p1", None, 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn body_validation() {
        let f = fixture();
        let err = f
            .store
            .create("demo", "Patient", json!({"resourceType": "Observation"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));

        let err = f
            .store
            .create("demo", "Patient", json!([1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn writes_fail_fast_when_offline() {
        let f = fixture();
        f.cluster.set_offline(true);
        let err = f.store.create("demo", "Patient", smith()).await.unwrap_err();
        assert!(matches!(err, CoreError::DatabaseUnavailable { .. }));
    }
}
