//! # API Endpoint Handlers
//!
//! Handlers take the catalog lock only for the duration of the core call.
//! Remote retrieval never holds it across network I/O.

use super::{
    AppState,
    types::{
        CreatedResponse, ErrorResponse, HealthResponse, IngestRecipesRequest,
        MetricDefinitionJson, MetricResponse, SearchRequest, SearchResponse, SpectrumResponse,
        StatusResponse, StrategyParams,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use grdb_core::{
    EquivalenceReport, ExperimentId, ExperimentReport, GrdbError, MetricReport, NewExperiment,
    QueryPushdownCompiler, RamanFileId, RecipeId, RecipeReport,
};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// A core error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GrdbError);

impl From<GrdbError> for ApiError {
    fn from(e: GrdbError) -> Self {
        Self(e)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GrdbError::RecipeNotFound(_)
            | GrdbError::ExperimentNotFound(_)
            | GrdbError::RamanFileNotFound(_)
            | GrdbError::UnknownMetric(_) => StatusCode::NOT_FOUND,
            GrdbError::InvalidInput(_) | GrdbError::UnknownUnit { .. } => StatusCode::BAD_REQUEST,
            GrdbError::RecipeInUse(_) => StatusCode::CONFLICT,
            GrdbError::RemoteFetch(_) | GrdbError::MalformedRemoteData { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GrdbError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Store status.
pub async fn status_handler(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let catalog = state.catalog.read().await;
    Ok(Json(StatusResponse::new(
        catalog.is_persistent(),
        catalog.stats()?,
        catalog.registry().len(),
    )))
}

// =============================================================================
// METRIC DEFINITIONS
// =============================================================================

pub async fn definitions_handler(State(state): State<AppState>) -> Json<Vec<MetricDefinitionJson>> {
    let catalog = state.catalog.read().await;
    let definitions = catalog
        .registry()
        .iter()
        .map(|def| MetricDefinitionJson::new(def, QueryPushdownCompiler::compile(def).to_sql()))
        .collect();
    Json(definitions)
}

// =============================================================================
// RECIPES
// =============================================================================

/// List every recipe with its metrics.
pub async fn list_recipes_handler(
    State(state): State<AppState>,
    Query(params): Query<StrategyParams>,
) -> ApiResult<Json<Vec<RecipeReport>>> {
    let catalog = state.catalog.read().await;
    Ok(Json(catalog.list(params.strategy)?))
}

/// Store one recipe or a batch (all or nothing).
pub async fn create_recipes_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestRecipesRequest>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let recipes = request.into_recipes();
    let ids = state.mutate(|catalog| catalog.ingest_batch(&recipes)).await?;
    tracing::info!(count = ids.len(), "recipes ingested");
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            ids: ids.into_iter().map(|id| id.0).collect(),
        }),
    ))
}

/// One recipe with metrics and steps.
pub async fn get_recipe_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<StrategyParams>,
) -> ApiResult<Json<RecipeReport>> {
    let catalog = state.catalog.read().await;
    Ok(Json(catalog.recipe_report(RecipeId(id), params.strategy)?))
}

pub async fn delete_recipe_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.mutate(|catalog| catalog.delete_recipe(RecipeId(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Evaluate one metric on one recipe.
///
/// A conversion failure is part of the 200 response (`error` field); only
/// a missing recipe or metric is a 404.
pub async fn recipe_metric_handler(
    State(state): State<AppState>,
    Path((id, name)): Path<(u64, String)>,
    Query(params): Query<StrategyParams>,
) -> ApiResult<Json<MetricResponse>> {
    let catalog = state.catalog.read().await;
    let def = catalog.registry().require(&name)?;
    let outcome = catalog.evaluate(&name, RecipeId(id), params.strategy)?;
    Ok(Json(MetricResponse::new(
        RecipeId(id),
        &name,
        params.strategy,
        MetricReport::from_outcome(def, &outcome),
    )))
}

/// Filter recipes by metric conditions.
pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let query = request.to_query()?;
    let catalog = state.catalog.read().await;
    Ok(Json(SearchResponse::new(catalog.search(&query)?)))
}

// =============================================================================
// EXPERIMENTS
// =============================================================================

pub async fn create_experiment_handler(
    State(state): State<AppState>,
    Json(experiment): Json<NewExperiment>,
) -> ApiResult<(StatusCode, Json<CreatedResponse>)> {
    let id = state.mutate(|catalog| catalog.ingest_experiment(&experiment)).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { ids: vec![id.0] })))
}

pub async fn get_experiment_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<ExperimentReport>> {
    let catalog = state.catalog.read().await;
    Ok(Json(catalog.experiment_report(ExperimentId(id))?))
}

pub async fn delete_experiment_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    state.mutate(|catalog| catalog.delete_experiment(ExperimentId(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// RAMAN DATA
// =============================================================================

/// Retrieve and parse a Raman spectrum.
pub async fn raman_data_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<SpectrumResponse>> {
    let id = RamanFileId(id);
    let file = state.catalog.read().await.raman_file(id)?;

    let resolved = state.fetcher.resolve(&file).await?;
    if resolved.newly_signed {
        state.mutate(|catalog| catalog.cache_raman_url(id, &resolved.url)).await?;
    }

    let data = state.fetcher.fetch(&resolved.url).await?;
    Ok(Json(SpectrumResponse { data }))
}

// =============================================================================
// VERIFICATION
// =============================================================================

/// Compare both evaluators over the whole store.
pub async fn verify_handler(State(state): State<AppState>) -> ApiResult<Json<EquivalenceReport>> {
    let catalog = state.catalog.read().await;
    let report = catalog.verify()?;
    if !report.is_equivalent() {
        tracing::warn!(divergences = report.divergences.len(), "evaluators diverge");
    }
    Ok(Json(report))
}
