//! # Catalog Module
//!
//! The recipe catalog: one storage backend plus the validated metric
//! registry, with the operations the app layer exposes.
//!
//! ## Storage Backends
//!
//! - `InMemory`: a `MemoryStore` (fast, volatile unless saved as a snapshot)
//! - `Persistent`: a `RedbStore` (disk-backed, ACID)
//!
//! ## Strategies
//!
//! Every metric-producing operation takes a `Strategy`. `InMemory` loads a
//! recipe's steps and evaluates directly; `Pushdown` compiles the metric and
//! lets the store aggregate over its own rows. Both give identical results.

use crate::equivalence::{EquivalenceReport, verify_store};
use crate::evaluator::InMemoryEvaluator;
use crate::ingestor::Ingestor;
use crate::metrics::{MetricOutcome, MetricRegistry};
use crate::pushdown::QueryPushdownCompiler;
use crate::query::RecipeQuery;
use crate::report::{ExperimentReport, RecipeReport};
use crate::storage::RedbStore;
use crate::store::{MemoryStore, RecipeStore};
use crate::{
    Experiment, ExperimentId, GrdbError, NewExperiment, NewRecipe, PreparationStep, RamanFile,
    RamanFileId, Recipe, RecipeId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Storage backend of a catalog.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// How metrics are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Load steps, evaluate in process.
    #[serde(rename = "memory")]
    InMemory,
    /// Compile and execute inside the store.
    #[default]
    Pushdown,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory => f.write_str("memory"),
            Self::Pushdown => f.write_str("pushdown"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = GrdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::InMemory),
            "pushdown" => Ok(Self::Pushdown),
            other => Err(GrdbError::InvalidInput(format!(
                "unknown strategy '{}' (expected memory or pushdown)",
                other
            ))),
        }
    }
}

/// Row counts of a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub recipes: usize,
    pub steps: usize,
    pub raman_files: usize,
}

/// A recipe catalog over one storage backend.
#[derive(Debug)]
pub struct Catalog {
    backend: StorageBackend,
    registry: &'static MetricRegistry,
}

impl Catalog {
    /// Create an empty in-memory catalog.
    ///
    /// Fails if the unit tables or the metric registry are invalid.
    pub fn new() -> Result<Self, GrdbError> {
        Self::with_backend(StorageBackend::default())
    }

    /// Create a catalog over an existing in-memory store.
    pub fn with_store(store: MemoryStore) -> Result<Self, GrdbError> {
        Self::with_backend(StorageBackend::InMemory(store))
    }

    /// Open or create a redb-backed catalog.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, GrdbError> {
        Self::with_backend(StorageBackend::Persistent(RedbStore::open(path)?))
    }

    pub fn with_backend(backend: StorageBackend) -> Result<Self, GrdbError> {
        Ok(Self {
            backend,
            registry: MetricRegistry::standard()?,
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The in-memory store, for snapshot saving. `None` for redb.
    #[must_use]
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backend {
            StorageBackend::InMemory(store) => Some(store),
            StorageBackend::Persistent(_) => None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &'static MetricRegistry {
        self.registry
    }

    fn store(&self) -> &dyn RecipeStore {
        match &self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn RecipeStore {
        match &mut self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    // =========================================================================
    // RECORDS
    // =========================================================================

    /// Validate and store a recipe.
    pub fn ingest_recipe(&mut self, recipe: &NewRecipe) -> Result<RecipeId, GrdbError> {
        Ingestor::ingest_recipe(self.store_mut(), recipe)
    }

    /// Validate a batch of recipes, then store all of them.
    pub fn ingest_batch(&mut self, recipes: &[NewRecipe]) -> Result<Vec<RecipeId>, GrdbError> {
        Ingestor::ingest_batch(self.store_mut(), recipes)
    }

    /// Validate and store an experiment with its Raman files.
    pub fn ingest_experiment(
        &mut self,
        experiment: &NewExperiment,
    ) -> Result<ExperimentId, GrdbError> {
        Ingestor::ingest_experiment(self.store_mut(), experiment)
    }

    pub fn recipe(&self, id: RecipeId) -> Result<Recipe, GrdbError> {
        self.store()
            .recipe(id)?
            .ok_or(GrdbError::RecipeNotFound(id))
    }

    /// Replace a recipe's steps after validating them.
    pub fn replace_steps(
        &mut self,
        id: RecipeId,
        steps: &[PreparationStep],
    ) -> Result<(), GrdbError> {
        for step in steps {
            Ingestor::validate_step(step)?;
        }
        self.store_mut().replace_steps(id, steps)
    }

    /// Delete a recipe and its steps.
    pub fn delete_recipe(&mut self, id: RecipeId) -> Result<(), GrdbError> {
        if self.store_mut().delete_recipe(id)? {
            tracing::debug!(recipe = id.0, "deleted recipe");
            Ok(())
        } else {
            Err(GrdbError::RecipeNotFound(id))
        }
    }

    pub fn experiment(&self, id: ExperimentId) -> Result<Experiment, GrdbError> {
        self.store()
            .experiment(id)?
            .ok_or(GrdbError::ExperimentNotFound(id))
    }

    pub fn experiment_report(&self, id: ExperimentId) -> Result<ExperimentReport, GrdbError> {
        Ok(ExperimentReport::from(&self.experiment(id)?))
    }

    /// Delete an experiment and its Raman files.
    pub fn delete_experiment(&mut self, id: ExperimentId) -> Result<(), GrdbError> {
        if self.store_mut().delete_experiment(id)? {
            Ok(())
        } else {
            Err(GrdbError::ExperimentNotFound(id))
        }
    }

    pub fn raman_file(&self, id: RamanFileId) -> Result<RamanFile, GrdbError> {
        self.store()
            .raman_file(id)?
            .ok_or(GrdbError::RamanFileNotFound(id))
    }

    /// Cache a resolved access URL on a Raman file.
    pub fn cache_raman_url(&mut self, id: RamanFileId, url: &str) -> Result<(), GrdbError> {
        self.store_mut().set_raman_url(id, url)
    }

    pub fn stats(&self) -> Result<CatalogStats, GrdbError> {
        let store = self.store();
        Ok(CatalogStats {
            recipes: store.recipe_count()?,
            steps: store.step_count()?,
            raman_files: store.raman_file_count()?,
        })
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    /// Evaluate one metric for one recipe.
    ///
    /// The outer error covers unknown metrics, missing recipes and store
    /// failures; the inner outcome is the metric's own result.
    pub fn evaluate(
        &self,
        metric: &str,
        recipe: RecipeId,
        strategy: Strategy,
    ) -> Result<MetricOutcome, GrdbError> {
        let def = self.registry.require(metric)?;
        let outcome = match strategy {
            Strategy::InMemory => {
                let steps = self.store().steps_for_recipe(recipe)?;
                InMemoryEvaluator::evaluate(def, &steps)
            }
            Strategy::Pushdown => {
                QueryPushdownCompiler::compile(def).evaluate_against_store(self.store(), recipe)
            }
        };
        split_outcome(outcome)
    }

    /// One recipe with all its metrics and steps.
    pub fn recipe_report(
        &self,
        id: RecipeId,
        strategy: Strategy,
    ) -> Result<RecipeReport, GrdbError> {
        let recipe = self.recipe(id)?;
        let outcomes = match strategy {
            Strategy::InMemory => {
                InMemoryEvaluator::evaluate_all(self.registry, &recipe.preparation_steps)
            }
            Strategy::Pushdown => {
                let mut outcomes = Vec::with_capacity(self.registry.len());
                for def in self.registry.iter() {
                    let outcome = QueryPushdownCompiler::compile(def)
                        .evaluate_against_store(self.store(), id);
                    outcomes.push((def, split_outcome(outcome)?));
                }
                outcomes
            }
        };
        Ok(RecipeReport::new(
            id,
            recipe.carbon_source.clone(),
            recipe.base_pressure.as_ref(),
            outcomes,
        )
        .with_steps(&recipe))
    }

    /// Every recipe with all its metrics (no steps).
    pub fn list(&self, strategy: Strategy) -> Result<Vec<RecipeReport>, GrdbError> {
        let store = self.store();
        let ids = store.recipe_ids()?;
        match strategy {
            Strategy::InMemory => ids
                .into_iter()
                .map(|id| -> Result<RecipeReport, GrdbError> {
                    let recipe = self.recipe(id)?;
                    Ok(RecipeReport::new(
                        id,
                        recipe.carbon_source.clone(),
                        recipe.base_pressure.as_ref(),
                        InMemoryEvaluator::evaluate_all(self.registry, &recipe.preparation_steps),
                    ))
                })
                .collect(),
            Strategy::Pushdown => {
                let mut columns = Vec::with_capacity(self.registry.len());
                for def in self.registry.iter() {
                    let expr = QueryPushdownCompiler::compile(def);
                    columns.push((def, store.execute_grouped(&expr)?));
                }

                let mut reports = Vec::with_capacity(ids.len());
                for id in ids {
                    let header = store
                        .recipe_header(id)?
                        .ok_or(GrdbError::RecipeNotFound(id))?;
                    let outcomes = columns.iter_mut().map(|(def, grouped)| {
                        let outcome = grouped
                            .remove(&id)
                            .unwrap_or(Err(GrdbError::RecipeNotFound(id)));
                        (*def, outcome)
                    });
                    reports.push(RecipeReport::new(
                        id,
                        header.carbon_source.clone(),
                        header.base_pressure.as_ref(),
                        outcomes,
                    ));
                }
                Ok(reports)
            }
        }
    }

    /// Recipes satisfying every condition of the query, ascending.
    ///
    /// Each condition runs as one grouped pushdown scan.
    pub fn search(&self, query: &RecipeQuery) -> Result<Vec<RecipeId>, GrdbError> {
        query.validate(self.registry)?;
        let store = self.store();

        let mut matching: BTreeSet<RecipeId> = store.recipe_ids()?.into_iter().collect();
        for condition in &query.conditions {
            let def = self.registry.require(&condition.metric)?;
            let grouped: BTreeMap<RecipeId, MetricOutcome> =
                store.execute_grouped(&QueryPushdownCompiler::compile(def))?;
            matching.retain(|id| match grouped.get(id) {
                Some(Ok(value)) => condition.matches(value.as_ref()),
                _ => false,
            });
        }
        tracing::debug!(
            conditions = query.conditions.len(),
            matches = matching.len(),
            "recipe search"
        );
        Ok(matching.into_iter().collect())
    }

    /// Render a metric's compiled expression as SQL.
    pub fn explain(&self, metric: &str) -> Result<String, GrdbError> {
        let def = self.registry.require(metric)?;
        Ok(QueryPushdownCompiler::compile(def).to_sql())
    }

    /// Check both evaluators against every stored recipe.
    pub fn verify(&self) -> Result<EquivalenceReport, GrdbError> {
        verify_store(self.store(), self.registry)
    }
}

/// Separate failures of the lookup itself from the metric's own outcome.
///
/// `UnknownUnit` belongs to the metric; everything else is the caller's.
fn split_outcome(outcome: MetricOutcome) -> Result<MetricOutcome, GrdbError> {
    match outcome {
        Err(e @ GrdbError::UnknownUnit { .. }) => Ok(Err(e)),
        Err(e) => Err(e),
        ok => Ok(ok),
    }
}

// =============================================================================
// TESTS
// =============================================================================
