use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use reeffhir_db_memory::MemoryCluster;
use reeffhir_server::{AppConfig, build_app, provision_memory_cluster};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("REEFFHIR_CONFIG").unwrap_or_else(|_| "reeffhir".to_string());
    let config = AppConfig::load(Some(&config_path)).context("loading configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = config.server.worker_threads {
        runtime.worker_threads(workers);
    }
    runtime
        .build()
        .context("building runtime")?
        .block_on(serve(config))
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    // Standalone mode runs against the in-memory backend; a production
    // deployment wires a real document-cluster implementation here.
    let cluster = Arc::new(MemoryCluster::new());
    provision_memory_cluster(&cluster, config.pagination_ttl());

    let addr = config.addr();
    let app = build_app(config, cluster);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "reeffhir-server listening");
    axum::serve(listener, app).await.context("serving")
}
