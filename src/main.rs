use std::sync::Arc;
use std::time::SystemTime;

use federa::api::{self, AppState};
use federa::config::Config;
use federa::connectors::ConnectorFactory;
use federa::lifecycle::RequestManager;
use federa::logging::init_logging;
use federa::metadata::MetadataStore;
use federa::registry::SourceRegistry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_logging(&config.logging)?;

    info!(
        connectors = config.connectors.len(),
        metadata_base_dir = %config.metadata_base_dir.display(),
        "starting federated query engine"
    );

    let metadata = Arc::new(MetadataStore::with_base_dir(&config.metadata_base_dir)?);
    let registry = Arc::new(SourceRegistry::from_configs(&config.connectors));
    let connector_factory = Arc::new(ConnectorFactory::new(config.kerberos.clone()));
    let requests = Arc::new(RequestManager::new(&config, metadata.clone(), registry.clone(), connector_factory.clone())?);

    requests.purge_stale_spill_files()?;
    requests.spawn_expiry_sweep();

    let state = AppState {
        requests,
        metadata,
        registry,
        connector_factory,
        auth_config: config.auth.clone(),
        start_time: SystemTime::now(),
    };

    let max_concurrent_requests = config.server.workers.max(1) * 32;
    let app = api::create_router(state, max_concurrent_requests);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
