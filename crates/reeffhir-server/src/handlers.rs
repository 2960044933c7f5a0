//! FHIR endpoint handlers. Thin glue: bind the tenant context, call the
//! store or the engine, map the outcome. Bodies are read as raw bytes so
//! both `application/fhir+json` and `application/json` are accepted.

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};

use reeffhir_api::{ApiError, fhir_response};
use reeffhir_core::TenantContext;
use reeffhir_search::parse_query;
use reeffhir_store::BundleProcessor;

use crate::state::AppState;

fn parse_body(bytes: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn version_of(doc: &Value) -> &str {
    doc["meta"]["versionId"].as_str().unwrap_or("1")
}

fn with_resource_headers(mut response: Response, state: &AppState, tenant: &str, doc: &Value) -> Response {
    let version = version_of(doc);
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{version}\"")) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    let resource_type = doc["resourceType"].as_str().unwrap_or_default();
    let id = doc["id"].as_str().unwrap_or_default();
    let location = format!(
        "{}/fhir/{tenant}/{resource_type}/{id}/_history/{version}",
        state.base_url
    );
    if let Ok(location) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

/// `GET /fhir/{tenant}/{type}/{id}` — read current.
pub async fn read(
    State(state): State<AppState>,
    Path((tenant, resource_type, id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let doc = state.store.read(tenant, &resource_type, &id).await?;
    Ok(with_resource_headers(
        fhir_response(StatusCode::OK, &doc),
        &state,
        tenant,
        &doc,
    ))
}

/// `POST /fhir/{tenant}/{type}` — create.
pub async fn create(
    State(state): State<AppState>,
    Path((tenant, resource_type)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let resource = parse_body(&body)?;
    let stored = state.store.create(tenant, &resource_type, resource).await?;
    Ok(with_resource_headers(
        fhir_response(StatusCode::CREATED, &stored),
        &state,
        tenant,
        &stored,
    ))
}

/// `PUT /fhir/{tenant}/{type}/{id}` — update-or-create.
pub async fn update(
    State(state): State<AppState>,
    Path((tenant, resource_type, id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let resource = parse_body(&body)?;
    let (stored, outcome) = state
        .store
        .update(tenant, &resource_type, &id, resource)
        .await?;
    let status = match outcome {
        reeffhir_store::UpdateOutcome::Created => StatusCode::CREATED,
        reeffhir_store::UpdateOutcome::Updated => StatusCode::OK,
    };
    Ok(with_resource_headers(
        fhir_response(status, &stored),
        &state,
        tenant,
        &stored,
    ))
}

/// `PATCH /fhir/{tenant}/{type}/{id}` — RFC 6902 patch.
pub async fn patch(
    State(state): State<AppState>,
    Path((tenant, resource_type, id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let patch: json_patch::Patch = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON Patch body: {e}")))?;
    let stored = state.store.patch(tenant, &resource_type, &id, &patch).await?;
    Ok(with_resource_headers(
        fhir_response(StatusCode::OK, &stored),
        &state,
        tenant,
        &stored,
    ))
}

/// `DELETE /fhir/{tenant}/{type}/{id}`.
pub async fn delete(
    State(state): State<AppState>,
    Path((tenant, resource_type, id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    state.store.delete(tenant, &resource_type, &id).await?;
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(axum::body::Body::empty())
        .expect("static response"))
}

/// `GET /fhir/{tenant}/{type}?...` — type-level search.
pub async fn search(
    State(state): State<AppState>,
    Path((tenant, resource_type)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let bundle = state
        .engine
        .search(
            tenant,
            &resource_type,
            query.as_deref().unwrap_or(""),
            &state.base_url,
        )
        .await?;
    Ok(fhir_response(StatusCode::OK, &bundle))
}

/// `GET /fhir/{tenant}/Patient/{id}/$everything`.
pub async fn everything(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let bundle = state
        .engine
        .everything(tenant, &id, query.as_deref().unwrap_or(""), &state.base_url)
        .await?;
    Ok(fhir_response(StatusCode::OK, &bundle))
}

/// `GET /fhir/{tenant}/{type}/{id}/_history/{vid}` — vread.
pub async fn vread(
    State(state): State<AppState>,
    Path((tenant, resource_type, id, version_id)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let doc = state
        .store
        .vread(tenant, &resource_type, &id, &version_id)
        .await?;
    Ok(fhir_response(StatusCode::OK, &doc))
}

/// `GET /fhir/{tenant}/{type}/{id}/_history` — history bundle, newest
/// first, with per-entry request/response and ETags.
pub async fn history(
    State(state): State<AppState>,
    Path((tenant, resource_type, id)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let params = parse_query(query.as_deref().unwrap_or(""));
    let count = params.count(
        state.config.pagination.default_page_size,
        state.config.search.max_page_size,
    )?;
    let since = params.since();

    let versions = state
        .store
        .history(tenant, &resource_type, &id, since, count)
        .await?;
    if versions.is_empty() {
        return Err(ApiError::not_found(format!("{resource_type}/{id}")));
    }

    let entries: Vec<Value> = versions
        .iter()
        .map(|doc| {
            let version = version_of(doc);
            let deleted = doc.get("deleted").and_then(Value::as_bool) == Some(true);
            let (method, status) = if deleted {
                ("DELETE", "204 No Content")
            } else if version == "1" {
                ("POST", "201 Created")
            } else {
                ("PUT", "200 OK")
            };
            let mut entry = json!({
                "fullUrl": format!("{}/fhir/{tenant}/{resource_type}/{id}", state.base_url),
                "request": {
                    "method": method,
                    "url": format!("{resource_type}/{id}"),
                },
                "response": {
                    "status": status,
                    "etag": format!("W/\"{version}\""),
                    "lastModified": doc["meta"]["lastUpdated"],
                },
            });
            if !deleted {
                entry
                    .as_object_mut()
                    .expect("entry is an object")
                    .insert("resource".into(), doc.clone());
            }
            entry
        })
        .collect();

    let bundle = json!({
        "resourceType": "Bundle",
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "history",
        "total": versions.len(),
        "entry": entries,
    });
    Ok(fhir_response(StatusCode::OK, &bundle))
}

/// `POST /fhir/{tenant}` — transaction or batch bundle.
pub async fn bundle(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let ctx = TenantContext::bound(tenant);
    let tenant = ctx.get()?;
    let bundle = parse_body(&body)?;
    let response = BundleProcessor::new(&state.store)
        .process(tenant, bundle)
        .await?;
    Ok(fhir_response(StatusCode::OK, &response))
}
