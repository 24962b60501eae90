use anyhow::{Context, Result};
use axum::Router;
use data_facade::{
    config::AppConfig,
    credentials::{Credentials, CredentialsError, MongoCredentials},
    routes,
    services::{
        document_store::DocumentStore,
        memory_backend::MemoryBackend,
        object_backend::{ObjectBackend, S3Backend},
        object_store::ObjectStore,
        relational_store::{RelationalOptions, RelationalStore},
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting data-facade with config: {:?}", cfg);

    // --- Service bindings ---
    let credentials = match Credentials::discover(&cfg.credentials_file, &cfg.cert_dir) {
        Ok(credentials) => credentials,
        Err(CredentialsError::NotFound(path)) => {
            tracing::warn!(
                "no service bindings in VCAP_SERVICES or {}; only explicitly configured backends are available",
                path
            );
            Credentials::default()
        }
        Err(err) => return Err(err).context("loading service credentials"),
    };
    tracing::debug!("Resolved credentials => {:?}", credentials);

    // --- Initialize stores ---
    let state = AppState {
        relational: connect_relational(&cfg, &credentials).await?,
        documents: connect_documents(&cfg, &credentials).await?,
        objects: build_object_store(&cfg, &credentials),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state.clone());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn connect_relational(
    cfg: &AppConfig,
    credentials: &Credentials,
) -> Result<Option<RelationalStore>> {
    let options = RelationalOptions {
        max_connections: cfg.pool_size,
        acquire_timeout: cfg.acquire_timeout,
        batch_size: cfg.batch_size,
    };
    let store = match (&cfg.database_url, &credentials.postgres) {
        (Some(url), _) => RelationalStore::connect_url(url, options).await,
        (None, Some(creds)) => RelationalStore::connect(creds, options).await,
        (None, None) => {
            tracing::warn!("relational store disabled: no PostgreSQL binding");
            return Ok(None);
        }
    };
    store.map(Some).context("connecting relational store")
}

async fn connect_documents(
    cfg: &AppConfig,
    credentials: &Credentials,
) -> Result<Option<DocumentStore>> {
    let creds = match (&cfg.mongodb_uri, &credentials.mongodb) {
        (Some(uri), _) => MongoCredentials {
            uri: uri.clone(),
            ca_cert_path: None,
        },
        (None, Some(creds)) => creds.clone(),
        (None, None) => {
            tracing::warn!("document store disabled: no MongoDB binding");
            return Ok(None);
        }
    };
    DocumentStore::connect(&creds, &cfg.nosql_database)
        .await
        .map(Some)
        .context("connecting document store")
}

fn build_object_store(cfg: &AppConfig, credentials: &Credentials) -> Option<ObjectStore> {
    let backend: Arc<dyn ObjectBackend> = if cfg.uses_memory_objects() {
        tracing::warn!("object store is in memory; objects are lost on exit");
        Arc::new(MemoryBackend::new())
    } else {
        let Some(binding) = &credentials.object_storage else {
            tracing::warn!("object store disabled: no object storage binding");
            return None;
        };
        let mut creds = binding.clone();
        if let Some(endpoint) = &cfg.cos_endpoint {
            creds.endpoint = Some(endpoint.clone());
        }
        Arc::new(S3Backend::new(&creds))
    };
    Some(ObjectStore::new(backend).with_page_size(cfg.page_size))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
