//! # grdb HTTP API Module
//!
//! HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Store counts
//! - `GET /metrics/definitions` - Registered metrics and their compiled SQL
//! - `GET /recipes` - Every recipe with its metrics (`?strategy=memory|pushdown`)
//! - `POST /recipes` - Ingest one recipe or a batch
//! - `GET /recipes/{id}` - One recipe with metrics and steps
//! - `DELETE /recipes/{id}` - Delete a recipe (409 while referenced)
//! - `GET /recipes/{id}/metrics/{name}` - Evaluate one metric
//! - `POST /recipes/search` - Filter by metric conditions
//! - `POST /experiments`, `GET /experiments/{id}`, `DELETE /experiments/{id}`
//! - `GET /raman/{id}/data` - Retrieve and parse a Raman spectrum
//! - `GET /verify` - Cross-check both evaluators
//!
//! ## Environment
//!
//! - `GRDB_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all
//!   (default: localhost only)

mod handlers;
mod types;

// Re-export handlers and types for integration tests (via `grdb::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    ApiError, create_experiment_handler, create_recipes_handler, definitions_handler,
    delete_experiment_handler, delete_recipe_handler, get_experiment_handler, get_recipe_handler,
    health_handler, list_recipes_handler, raman_data_handler, recipe_metric_handler,
    search_handler, status_handler, verify_handler,
};
#[allow(unused_imports)]
pub use types::{
    CreatedResponse, ErrorResponse, HealthResponse, IngestRecipesRequest, MetricDefinitionJson,
    MetricResponse, SearchRequest, SearchResponse, SpectrumResponse, StatusResponse,
    StrategyParams,
};

use crate::config::{Config, RemoteConfig};
use crate::remote::SpectrumFetcher;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use grdb_core::{Catalog, GrdbError, store_to_bytes};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Default request body limit (2 MB).
const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<RwLock<Catalog>>,
    pub fetcher: Arc<SpectrumFetcher>,
    /// Snapshot file rewritten after each mutation (file backend only).
    snapshot: Option<Arc<PathBuf>>,
}

impl AppState {
    /// State with default remote settings and no snapshot file.
    pub fn new(catalog: Catalog) -> Result<Self, GrdbError> {
        Self::with_remote(catalog, &RemoteConfig::default())
    }

    pub fn with_remote(catalog: Catalog, remote: &RemoteConfig) -> Result<Self, GrdbError> {
        Ok(Self {
            catalog: Arc::new(RwLock::new(catalog)),
            fetcher: Arc::new(SpectrumFetcher::new(remote)?),
            snapshot: None,
        })
    }

    #[must_use]
    pub fn with_snapshot(mut self, path: PathBuf) -> Self {
        self.snapshot = Some(Arc::new(path));
        self
    }

    /// Apply a mutation under the write lock.
    ///
    /// With a snapshot file the mutation runs on a copy of the store, and
    /// the copy replaces the live catalog only once the snapshot is written.
    /// A failed write leaves both the catalog and the file unchanged.
    pub(crate) async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Catalog) -> Result<T, GrdbError>,
    ) -> Result<T, GrdbError> {
        let mut catalog = self.catalog.write().await;
        let staged = match (&self.snapshot, catalog.memory_store()) {
            (Some(path), Some(store)) => Some((path, Catalog::with_store(store.clone())?)),
            _ => None,
        };
        let Some((path, mut staged)) = staged else {
            return apply(&mut catalog);
        };

        let value = apply(&mut staged)?;
        if let Some(store) = staged.memory_store() {
            std::fs::write(path.as_path(), store_to_bytes(store)?)
                .map_err(|e| GrdbError::IoError(format!("Write snapshot: {}", e)))?;
        }
        *catalog = staged;
        Ok(value)
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `GRDB_CORS_ORIGINS`.
///
/// - "*": allows all origins
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("GRDB_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (GRDB_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins in GRDB_CORS_ORIGINS, using localhost");
                build_localhost_cors()
            } else {
                cors_for(allowed_origins)
            }
        }
        None => build_localhost_cors(),
    }
}

fn cors_for(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    cors_for(origins)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with the default body limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_limit(state, DEFAULT_BODY_LIMIT)
}

/// Create the axum router with all endpoints and middleware.
pub fn create_router_with_limit(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/metrics/definitions", get(handlers::definitions_handler))
        .route(
            "/recipes",
            get(handlers::list_recipes_handler).post(handlers::create_recipes_handler),
        )
        .route("/recipes/search", post(handlers::search_handler))
        .route(
            "/recipes/{id}",
            get(handlers::get_recipe_handler).delete(handlers::delete_recipe_handler),
        )
        .route(
            "/recipes/{id}/metrics/{name}",
            get(handlers::recipe_metric_handler),
        )
        .route("/experiments", post(handlers::create_experiment_handler))
        .route(
            "/experiments/{id}",
            get(handlers::get_experiment_handler).delete(handlers::delete_experiment_handler),
        )
        .route("/raman/{id}/data", get(handlers::raman_data_handler))
        .route("/verify", get(handlers::verify_handler))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(config: &Config, catalog: Catalog) -> Result<(), GrdbError> {
    let mut state = AppState::with_remote(catalog, &config.remote)?;
    if !state.catalog.read().await.is_persistent() {
        state = state.with_snapshot(config.storage.path.clone());
    }
    let router = create_router_with_limit(state, config.server.body_limit_bytes);

    let addr = config.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GrdbError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("grdb HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GrdbError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
