//! # API Request/Response Types
//!
//! JSON structures for the HTTP API. Recipe, experiment and metric
//! payloads reuse the core report types so the `{value, unit}` shape is
//! identical on every surface.

use grdb_core::{
    CatalogStats, Condition, GrdbError, MetricDefinition, MetricReport, MetricValue, NewRecipe,
    RecipeId, RecipeQuery, SpectrumPoint, Strategy,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Store status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub persistent: bool,
    pub recipes: usize,
    pub steps: usize,
    pub raman_files: usize,
    pub metrics: usize,
}

impl StatusResponse {
    #[must_use]
    pub fn new(persistent: bool, stats: CatalogStats, metrics: usize) -> Self {
        Self {
            persistent,
            recipes: stats.recipes,
            steps: stats.steps,
            raman_files: stats.raman_files,
            metrics,
        }
    }
}

// =============================================================================
// METRIC DEFINITIONS
// =============================================================================

/// One registered metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinitionJson {
    pub name: String,
    pub label: String,
    pub aggregate: String,
    pub unit: Option<String>,
    pub columns: Vec<String>,
    /// The compiled pushdown expression as SQL.
    pub sql: String,
}

impl MetricDefinitionJson {
    #[must_use]
    pub fn new(def: &MetricDefinition, sql: String) -> Self {
        Self {
            name: def.name.to_string(),
            label: def.label.to_string(),
            aggregate: def.aggregate.sql_name().to_lowercase(),
            unit: def.standard_unit.map(str::to_string),
            columns: def.columns().iter().map(|f| f.name().to_string()).collect(),
            sql,
        }
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// `?strategy=memory|pushdown`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StrategyParams {
    #[serde(default)]
    pub strategy: Strategy,
}

// =============================================================================
// INGESTION
// =============================================================================

/// `POST /recipes` body: one recipe or a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IngestRecipesRequest {
    Batch(Vec<NewRecipe>),
    One(NewRecipe),
}

impl IngestRecipesRequest {
    #[must_use]
    pub fn into_recipes(self) -> Vec<NewRecipe> {
        match self {
            Self::Batch(recipes) => recipes,
            Self::One(recipe) => vec![recipe],
        }
    }
}

/// Identifiers assigned to newly stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub ids: Vec<u64>,
}

// =============================================================================
// METRIC EVALUATION
// =============================================================================

/// `GET /recipes/{id}/metrics/{name}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResponse {
    pub recipe: u64,
    pub metric: String,
    pub strategy: Strategy,
    pub value: Option<MetricValue>,
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricResponse {
    #[must_use]
    pub fn new(recipe: RecipeId, metric: &str, strategy: Strategy, report: MetricReport) -> Self {
        Self {
            recipe: recipe.0,
            metric: metric.to_string(),
            strategy,
            value: report.value,
            unit: report.unit,
            error: report.error,
        }
    }
}

// =============================================================================
// SEARCH
// =============================================================================

/// `POST /recipes/search` body.
///
/// Conditions can be given structured, as text (`"growth_duration>=10"`),
/// or both; all of them must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl SearchRequest {
    pub fn to_query(&self) -> Result<RecipeQuery, GrdbError> {
        let parsed = RecipeQuery::parse_all(&self.expressions)?;
        Ok(self
            .conditions
            .iter()
            .cloned()
            .chain(parsed.conditions)
            .fold(RecipeQuery::new(), RecipeQuery::and))
    }
}

/// Matching recipe identifiers, ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub count: usize,
    pub ids: Vec<u64>,
}

impl SearchResponse {
    #[must_use]
    pub fn new(ids: Vec<RecipeId>) -> Self {
        Self {
            count: ids.len(),
            ids: ids.into_iter().map(|id| id.0).collect(),
        }
    }
}

// =============================================================================
// SPECTRUM
// =============================================================================

/// `GET /raman/{id}/data` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumResponse {
    pub data: Vec<SpectrumPoint>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
