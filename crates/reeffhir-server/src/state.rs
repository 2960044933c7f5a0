//! Process-wide services, built once at startup and shared by every request
//! handler. Nothing in here is constructed lazily per request.

use std::collections::BTreeMap;
use std::sync::Arc;

use reeffhir_core::CollectionRouter;
use reeffhir_gateway::{DbGateway, DocumentCluster};
use reeffhir_search::{SearchConfig, SearchEngine, SearchSchema};
use reeffhir_store::ResourceStore;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<DbGateway>,
    pub store: Arc<ResourceStore>,
    pub engine: Arc<SearchEngine>,
    pub base_url: String,
}

impl AppState {
    pub fn build(config: AppConfig, cluster: Arc<dyn DocumentCluster>) -> Self {
        let router = Arc::new(CollectionRouter::with_defaults());
        let schema = Arc::new(SearchSchema::new());
        let gateway = Arc::new(DbGateway::new(
            cluster,
            config.circuit_reset_timeout(),
            config.tenant_names(),
        ));

        let everything: BTreeMap<String, Vec<String>> = config
            .tenants
            .iter()
            .map(|t| (t.name.clone(), t.everything.clone()))
            .collect();

        let engine = Arc::new(
            SearchEngine::new(
                Arc::clone(&gateway),
                Arc::clone(&router),
                schema,
                SearchConfig {
                    fts_limit: config.search.fts_limit,
                    default_page_size: config.pagination.default_page_size,
                    max_page_size: config.search.max_page_size,
                },
            )
            .with_everything_types(everything),
        );
        let store = Arc::new(ResourceStore::new(Arc::clone(&gateway), router));
        let base_url = config.base_url();

        Self {
            config: Arc::new(config),
            gateway,
            store,
            engine,
            base_url,
        }
    }

    /// The bucket probed by readiness checks.
    pub fn probe_tenant(&self) -> Option<&str> {
        self.config.tenants.first().map(|t| t.name.as_str())
    }
}
