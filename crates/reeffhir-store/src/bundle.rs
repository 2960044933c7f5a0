//! Bundle execution: `transaction` (all-or-nothing) and `batch`
//! (independent entries), with synthetic-id reference rewriting.
//!
//! Entries whose `fullUrl` is a `urn:uuid:` placeholder get server-assigned
//! ids before any write, and every `reference` field inside the bundle is
//! rewritten to the assigned id by recursing over the JSON tree (references
//! hide in nested composites, so the whole resource is traversed).

use std::collections::BTreeMap;

use serde_json::{Value, json};
use uuid::Uuid;

use reeffhir_core::{CoreError, Result};

use crate::store::{ResourceStore, UpdateOutcome};

/// One entry's planned operation.
#[derive(Debug)]
struct PlannedEntry {
    method: String,
    resource_type: String,
    id: Option<String>,
    resource: Option<Value>,
}

pub struct BundleProcessor<'a> {
    store: &'a ResourceStore,
}

impl<'a> BundleProcessor<'a> {
    pub fn new(store: &'a ResourceStore) -> Self {
        Self { store }
    }

    /// Execute a `transaction` or `batch` bundle against one tenant.
    pub async fn process(&self, tenant: &str, bundle: Value) -> Result<Value> {
        if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Err(CoreError::invalid_request("body must be a Bundle"));
        }
        let bundle_type = bundle
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid_request("Bundle lacks a type"))?
            .to_string();

        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let planned = plan_entries(entries)?;

        match bundle_type.as_str() {
            "transaction" => self.run_transaction(tenant, planned).await,
            "batch" => self.run_batch(tenant, planned).await,
            other => Err(CoreError::invalid_request(format!(
                "Bundle type '{other}' is not executable; use transaction or batch"
            ))),
        }
    }

    /// All entries inside one multi-document transaction; any failure rolls
    /// back every write and surfaces as a single error.
    async fn run_transaction(&self, tenant: &str, planned: Vec<PlannedEntry>) -> Result<Value> {
        let mut tx = self.store.gateway().cluster_for_transaction(tenant).await?;
        let mut responses = Vec::with_capacity(planned.len());

        for entry in &planned {
            let outcome = self.apply_in_tx(tx.as_mut(), tenant, entry).await;
            match outcome {
                Ok(response) => responses.push(response),
                Err(err) => {
                    let _ = tx.rollback().await;
                    return Err(err);
                }
            }
        }
        tx.commit().await.map_err(CoreError::from)?;

        Ok(response_bundle("transaction-response", responses))
    }

    /// Entries executed independently; each entry records its own outcome.
    async fn run_batch(&self, tenant: &str, planned: Vec<PlannedEntry>) -> Result<Value> {
        let mut responses = Vec::with_capacity(planned.len());
        for entry in &planned {
            let outcome = self.apply_standalone(tenant, entry).await;
            responses.push(match outcome {
                Ok(response) => response,
                Err(err) => entry_error_response(&err),
            });
        }
        Ok(response_bundle("batch-response", responses))
    }

    async fn apply_in_tx(
        &self,
        tx: &mut dyn reeffhir_gateway::DocumentTransaction,
        tenant: &str,
        entry: &PlannedEntry,
    ) -> Result<Value> {
        match entry.method.as_str() {
            "POST" => {
                let body = entry.resource.clone().ok_or_else(|| {
                    CoreError::invalid_request("POST entry lacks a resource")
                })?;
                let stored = self
                    .store
                    .create_in_tx(tx, tenant, &entry.resource_type, body)
                    .await?;
                Ok(entry_success_response("201 Created", &stored))
            }
            "PUT" => {
                let body = entry.resource.clone().ok_or_else(|| {
                    CoreError::invalid_request("PUT entry lacks a resource")
                })?;
                let id = entry.id.clone().ok_or_else(|| {
                    CoreError::invalid_request("PUT entry URL lacks an id")
                })?;
                let (stored, outcome) = self
                    .store
                    .update_in_tx(tx, tenant, &entry.resource_type, &id, body)
                    .await?;
                let status = match outcome {
                    UpdateOutcome::Created => "201 Created",
                    UpdateOutcome::Updated => "200 OK",
                };
                Ok(entry_success_response(status, &stored))
            }
            "DELETE" => {
                let id = entry.id.clone().ok_or_else(|| {
                    CoreError::invalid_request("DELETE entry URL lacks an id")
                })?;
                self.store
                    .delete_in_tx(tx, tenant, &entry.resource_type, &id)
                    .await?;
                Ok(json!({"response": {"status": "204 No Content"}}))
            }
            other => Err(CoreError::invalid_request(format!(
                "unsupported bundle entry method '{other}'"
            ))),
        }
    }

    async fn apply_standalone(&self, tenant: &str, entry: &PlannedEntry) -> Result<Value> {
        match entry.method.as_str() {
            "POST" => {
                let body = entry.resource.clone().ok_or_else(|| {
                    CoreError::invalid_request("POST entry lacks a resource")
                })?;
                let stored = self
                    .store
                    .create(tenant, &entry.resource_type, body)
                    .await?;
                Ok(entry_success_response("201 Created", &stored))
            }
            "PUT" => {
                let body = entry.resource.clone().ok_or_else(|| {
                    CoreError::invalid_request("PUT entry lacks a resource")
                })?;
                let id = entry.id.clone().ok_or_else(|| {
                    CoreError::invalid_request("PUT entry URL lacks an id")
                })?;
                let (stored, outcome) = self
                    .store
                    .update(tenant, &entry.resource_type, &id, body)
                    .await?;
                let status = match outcome {
                    UpdateOutcome::Created => "201 Created",
                    UpdateOutcome::Updated => "200 OK",
                };
                Ok(entry_success_response(status, &stored))
            }
            "DELETE" => {
                let id = entry.id.clone().ok_or_else(|| {
                    CoreError::invalid_request("DELETE entry URL lacks an id")
                })?;
                self.store
                    .delete(tenant, &entry.resource_type, &id)
                    .await?;
                Ok(json!({"response": {"status": "204 No Content"}}))
            }
            other => Err(CoreError::invalid_request(format!(
                "unsupported bundle entry method '{other}'"
            ))),
        }
    }
}

/// Assign ids to synthetic entries, rewrite references, and parse each
/// entry's request line.
fn plan_entries(entries: Vec<Value>) -> Result<Vec<PlannedEntry>> {
    // First pass: allocate ids for urn:uuid fullUrls of POST entries.
    let mut assigned: BTreeMap<String, String> = BTreeMap::new();
    for entry in &entries {
        let Some(full_url) = entry.get("fullUrl").and_then(Value::as_str) else {
            continue;
        };
        if !full_url.starts_with("urn:uuid:") {
            continue;
        }
        let resource_type = entry
            .get("resource")
            .and_then(|r| r.get("resourceType"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::invalid_request(format!(
                    "entry '{full_url}' lacks a resource with resourceType"
                ))
            })?;
        let id = Uuid::new_v4().to_string();
        assigned.insert(full_url.to_string(), format!("{resource_type}/{id}"));
    }

    let mut planned = Vec::with_capacity(entries.len());
    for entry in entries {
        let request = entry.get("request").ok_or_else(|| {
            CoreError::invalid_request("bundle entry lacks a request")
        })?;
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid_request("bundle entry lacks request.method"))?
            .to_uppercase();
        let url = request
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::invalid_request("bundle entry lacks request.url"))?;

        let (resource_type, mut id) = match url.split_once('/') {
            Some((t, rest)) => (t.to_string(), Some(rest.to_string())),
            None => (url.to_string(), None),
        };

        let mut resource = entry.get("resource").cloned();
        if let Some(resource) = &mut resource {
            rewrite_references(resource, &assigned);
            // A synthetic entry writes under its assigned id.
            if let Some(full_url) = entry.get("fullUrl").and_then(Value::as_str) {
                if let Some(target) = assigned.get(full_url) {
                    let (_, new_id) = target.split_once('/').expect("assigned key shape");
                    resource
                        .as_object_mut()
                        .map(|m| m.insert("id".into(), json!(new_id)));
                    if method == "POST" {
                        id = Some(new_id.to_string());
                    }
                }
            }
        }

        planned.push(PlannedEntry {
            method,
            resource_type,
            id,
            resource,
        });
    }
    Ok(planned)
}

/// Rewrite every `reference` field whose value is a synthetic id.
fn rewrite_references(value: &mut Value, assigned: &BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key == "reference" {
                    if let Some(s) = v.as_str() {
                        if let Some(target) = assigned.get(s) {
                            *v = json!(target);
                            continue;
                        }
                    }
                }
                rewrite_references(v, assigned);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, assigned);
            }
        }
        _ => {}
    }
}

fn entry_success_response(status: &str, stored: &Value) -> Value {
    let resource_type = stored["resourceType"].as_str().unwrap_or_default();
    let id = stored["id"].as_str().unwrap_or_default();
    let version = stored["meta"]["versionId"].as_str().unwrap_or("1");
    json!({
        "response": {
            "status": status,
            "location": format!("{resource_type}/{id}/_history/{version}"),
            "etag": format!("W/\"{version}\""),
        },
        "resource": stored,
    })
}

fn entry_error_response(err: &CoreError) -> Value {
    let status = match err.category() {
        reeffhir_core::ErrorCategory::Invalid => "400 Bad Request",
        reeffhir_core::ErrorCategory::NotFound => "404 Not Found",
        reeffhir_core::ErrorCategory::Gone => "410 Gone",
        reeffhir_core::ErrorCategory::Conflict => "409 Conflict",
        reeffhir_core::ErrorCategory::Validation => "422 Unprocessable Entity",
        reeffhir_core::ErrorCategory::Unavailable => "503 Service Unavailable",
        reeffhir_core::ErrorCategory::Internal => "500 Internal Server Error",
    };
    json!({
        "response": {
            "status": status,
            "outcome": {
                "resourceType": "OperationOutcome",
                "issue": [{
                    "severity": "error",
                    "code": err.category().to_string(),
                    "diagnostics": err.to_string(),
                }]
            }
        }
    })
}

fn response_bundle(bundle_type: &str, responses: Vec<Value>) -> Value {
    json!({
        "resourceType": "Bundle",
        "id": Uuid::new_v4().to_string(),
        "type": bundle_type,
        "entry": responses,
    })
}
