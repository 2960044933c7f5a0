//! HTTP surface of the ReefFHIR server: tenant-prefixed FHIR R4 endpoints,
//! health/readiness with circuit visibility, request instrumentation, and
//! configuration. All storage and search work is delegated to the gateway,
//! store, and engine crates.

pub mod config;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use reeffhir_core::CollectionRouter;
use reeffhir_core::router::{COLLECTION_CACHE, COLLECTION_VERSIONS, SCOPE_ADMIN, SCOPE_RESOURCES, SCOPE_VERSIONS};
use reeffhir_db_memory::MemoryCluster;
use reeffhir_gateway::DocumentCluster;

pub use config::AppConfig;
pub use state::AppState;

/// Build the complete application against any document-cluster backend.
pub fn build_app(config: AppConfig, cluster: Arc<dyn DocumentCluster>) -> Router {
    let timeout = config.request_timeout();
    let state = AppState::build(config, cluster);
    routes::build_router(state, timeout)
}

/// Provision an in-memory cluster the way bucket provisioning sets up the
/// real database: one FTS index per collection (plus Versions) and the
/// `Admin.cache` TTL. Used by the binary's standalone mode and by tests.
pub fn provision_memory_cluster(cluster: &MemoryCluster, pagination_ttl: Duration) {
    let router = CollectionRouter::with_defaults();
    for (collection, index) in router.all_indexes() {
        let scope = if collection == COLLECTION_VERSIONS {
            SCOPE_VERSIONS
        } else {
            SCOPE_RESOURCES
        };
        cluster.register_index(index, scope, collection);
    }
    cluster.set_collection_ttl(SCOPE_ADMIN, COLLECTION_CACHE, pagination_ttl);
}
