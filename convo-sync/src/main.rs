use std::sync::Arc;

use axum::http::{header, Method};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use convo_sync::api;
use convo_sync::config::Config;
use convo_sync::document::{DocumentSource, FileDocument, InMemoryDocument};
use convo_sync::runtime::{RuntimeOptions, SyncRuntime};
use convo_sync::similarity::{HttpSimilarityClient, SimilarityService, UnconfiguredSimilarityService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        database_url = %config.database_url,
        bind = %config.bind,
        debounce_ms = config.debounce.as_millis() as u64,
        auto_process = config.auto_process,
        "Starting convo-sync"
    );

    let service: Arc<dyn SimilarityService> = match &config.similarity_url {
        Some(url) => {
            let client = HttpSimilarityClient::new(
                url,
                config.similarity_token.clone(),
                config.remote_timeout,
            )?;
            tracing::info!(endpoint = %client.endpoint(), "Similarity service configured");
            Arc::new(client)
        }
        None => {
            tracing::warn!("CONVO_SYNC_SIMILARITY_URL not set; processing attempts will fail");
            Arc::new(UnconfiguredSimilarityService)
        }
    };

    let mut poller = None;
    let source: Arc<dyn DocumentSource> = match &config.document_path {
        Some(path) => {
            let document = FileDocument::new(path);
            poller = Some(document.spawn_poller(config.document_poll));
            tracing::info!(path = %path.display(), "Watching transcript file");
            document
        }
        None => {
            tracing::warn!("CONVO_SYNC_DOCUMENT_PATH not set; observing an empty document");
            InMemoryDocument::new()
        }
    };

    let runtime = SyncRuntime::start(RuntimeOptions::from_config(&config, source, service)).await?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    let api_state = api::ApiState {
        controller: runtime.controller.clone(),
        store: runtime.store.clone(),
        bus: runtime.bus.clone(),
    };
    let app = api::router().with_state(api_state).layer(cors);

    let listener = TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(poller) = poller {
        poller.abort();
    }
    runtime.shutdown().await;
    Ok(())
}
