//! Shared test harness: the full app wired to the in-memory cluster,
//! driven in-process with oneshot requests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use reeffhir_db_memory::MemoryCluster;
use reeffhir_gateway::DocumentCluster;
use reeffhir_server::config::TenantConfig;
use reeffhir_server::{AppConfig, build_app, provision_memory_cluster};

pub struct TestServer {
    pub cluster: Arc<MemoryCluster>,
    pub app: Router,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.base_url = Some("http://localhost:8080".to_string());
    config.tenants = vec![TenantConfig {
        name: "demo".to_string(),
        everything: vec!["Observation".to_string(), "Encounter".to_string()],
    }];
    config
}

pub fn start(config: AppConfig) -> TestServer {
    let cluster = Arc::new(MemoryCluster::new());
    provision_memory_cluster(&cluster, config.pagination_ttl());
    let backend: Arc<dyn DocumentCluster> = cluster.clone() as Arc<dyn DocumentCluster>;
    let app = build_app(config, backend);
    TestServer { cluster, app }
}

pub fn start_default() -> TestServer {
    start(test_config())
}

pub async fn send(
    server: &TestServer,
    method: &str,
    path: &str,
    body: Option<&Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::ACCEPT, "application/fhir+json");
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/fhir+json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => {
            builder = builder.header(header::CONTENT_LENGTH, "0");
            builder.body(Body::empty()).unwrap()
        }
    };

    let response = server.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Follow a bundle's `next` link (path + query only).
pub fn next_path(bundle: &Value) -> Option<String> {
    bundle["link"].as_array().and_then(|links| {
        links
            .iter()
            .find(|l| l["relation"] == "next")
            .and_then(|l| l["url"].as_str())
            .map(|url| url.trim_start_matches("http://localhost:8080").to_string())
    })
}
