//! # Step Store
//!
//! The storage collaborator of the metrics engine.
//!
//! - `StepStore` is what the evaluators need: ordered steps for the
//!   in-memory path, and execution of compiled aggregate expressions for the
//!   pushdown path.
//! - `RecipeStore` adds the recipe/experiment lifecycle, including the
//!   cascading-delete contract: deleting a recipe deletes its steps, deleting
//!   an experiment deletes its Raman files, no orphan rows survive.
//!
//! `MemoryStore` is the in-memory backend; `storage::RedbStore` is the
//! persistent one. Both honour identical semantics.

use crate::metrics::MetricOutcome;
use crate::pushdown::AggregateExpression;
use crate::{
    Experiment, ExperimentHeader, ExperimentId, GrdbError, MetricValue, NewExperiment, NewRecipe,
    PreparationStep, RamanFile, RamanFileId, Recipe, RecipeHeader, RecipeId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Read access needed by the two evaluators.
///
/// Every call observes one consistent snapshot of the store.
pub trait StepStore {
    /// Identifiers of every stored recipe, ascending.
    fn recipe_ids(&self) -> Result<Vec<RecipeId>, GrdbError>;

    /// A recipe's steps, in order. `RecipeNotFound` if it does not exist.
    fn steps_for_recipe(&self, recipe: RecipeId) -> Result<Vec<PreparationStep>, GrdbError>;

    /// Execute a compiled expression correlated to one recipe.
    ///
    /// `RecipeNotFound` if the recipe does not exist.
    fn execute_aggregate(
        &self,
        expr: &AggregateExpression,
        recipe: RecipeId,
    ) -> Result<Option<MetricValue>, GrdbError>;

    /// Execute a compiled expression for every recipe in one scan.
    ///
    /// Store failures abort the whole scan; a per-recipe evaluation failure
    /// (such as an unknown unit) is confined to that recipe's entry.
    fn execute_grouped(
        &self,
        expr: &AggregateExpression,
    ) -> Result<BTreeMap<RecipeId, MetricOutcome>, GrdbError>;
}

/// Full recipe lifecycle on top of `StepStore`.
pub trait RecipeStore: StepStore {
    /// Store a recipe and its ordered steps. Returns the new identifier.
    fn insert_recipe(&mut self, recipe: &NewRecipe) -> Result<RecipeId, GrdbError>;

    /// Load a recipe with its steps.
    fn recipe(&self, id: RecipeId) -> Result<Option<Recipe>, GrdbError>;

    /// Load only a recipe's own fields, without its steps.
    fn recipe_header(&self, id: RecipeId) -> Result<Option<RecipeHeader>, GrdbError>;

    /// Replace a recipe's steps, keeping its header.
    fn replace_steps(&mut self, id: RecipeId, steps: &[PreparationStep]) -> Result<(), GrdbError>;

    /// Delete a recipe and all its steps.
    ///
    /// Returns `false` if it did not exist, `RecipeInUse` while an
    /// experiment references it.
    fn delete_recipe(&mut self, id: RecipeId) -> Result<bool, GrdbError>;

    /// Number of stored recipes.
    fn recipe_count(&self) -> Result<usize, GrdbError>;

    /// Number of stored step rows across all recipes.
    fn step_count(&self) -> Result<usize, GrdbError>;

    /// Store an experiment with its Raman files.
    fn insert_experiment(&mut self, experiment: &NewExperiment) -> Result<ExperimentId, GrdbError>;

    /// Load an experiment with its Raman files.
    fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, GrdbError>;

    /// Delete an experiment and all its Raman files.
    fn delete_experiment(&mut self, id: ExperimentId) -> Result<bool, GrdbError>;

    /// Load one Raman file record.
    fn raman_file(&self, id: RamanFileId) -> Result<Option<RamanFile>, GrdbError>;

    /// Cache a resolved access URL on a Raman file record.
    fn set_raman_url(&mut self, id: RamanFileId, url: &str) -> Result<(), GrdbError>;

    /// Number of stored Raman file rows.
    fn raman_file_count(&self) -> Result<usize, GrdbError>;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredRecipe {
    header: RecipeHeader,
    steps: Vec<PreparationStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredExperiment {
    header: ExperimentHeader,
    files: BTreeMap<RamanFileId, RamanFile>,
}

/// In-memory recipe store.
///
/// Uses `BTreeMap` throughout so iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    recipes: BTreeMap<RecipeId, StoredRecipe>,
    experiments: BTreeMap<ExperimentId, StoredExperiment>,
    raman_index: BTreeMap<RamanFileId, ExperimentId>,
    last_recipe_id: u64,
    last_experiment_id: u64,
    last_raman_file_id: u64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stored(&self, recipe: RecipeId) -> Result<&StoredRecipe, GrdbError> {
        self.recipes
            .get(&recipe)
            .ok_or(GrdbError::RecipeNotFound(recipe))
    }

    fn is_referenced(&self, recipe: RecipeId) -> bool {
        self.experiments
            .values()
            .any(|e| e.header.recipe_id == Some(recipe))
    }
}

impl StepStore for MemoryStore {
    fn recipe_ids(&self) -> Result<Vec<RecipeId>, GrdbError> {
        Ok(self.recipes.keys().copied().collect())
    }

    fn steps_for_recipe(&self, recipe: RecipeId) -> Result<Vec<PreparationStep>, GrdbError> {
        Ok(self.stored(recipe)?.steps.clone())
    }

    fn execute_aggregate(
        &self,
        expr: &AggregateExpression,
        recipe: RecipeId,
    ) -> Result<Option<MetricValue>, GrdbError> {
        let stored = self.stored(recipe)?;
        expr.fold_rows(stored.steps.iter().map(Ok::<_, GrdbError>))
    }

    fn execute_grouped(
        &self,
        expr: &AggregateExpression,
    ) -> Result<BTreeMap<RecipeId, MetricOutcome>, GrdbError> {
        Ok(self
            .recipes
            .iter()
            .map(|(id, stored)| {
                (
                    *id,
                    expr.fold_rows(stored.steps.iter().map(Ok::<_, GrdbError>)),
                )
            })
            .collect())
    }
}

impl RecipeStore for MemoryStore {
    fn insert_recipe(&mut self, recipe: &NewRecipe) -> Result<RecipeId, GrdbError> {
        self.last_recipe_id = self.last_recipe_id.saturating_add(1);
        let id = RecipeId(self.last_recipe_id);
        self.recipes.insert(
            id,
            StoredRecipe {
                header: RecipeHeader::from(recipe),
                steps: recipe.preparation_steps.clone(),
            },
        );
        Ok(id)
    }

    fn recipe(&self, id: RecipeId) -> Result<Option<Recipe>, GrdbError> {
        Ok(self
            .recipes
            .get(&id)
            .map(|s| Recipe::from_parts(id, s.header.clone(), s.steps.clone())))
    }

    fn recipe_header(&self, id: RecipeId) -> Result<Option<RecipeHeader>, GrdbError> {
        Ok(self.recipes.get(&id).map(|s| s.header.clone()))
    }

    fn replace_steps(&mut self, id: RecipeId, steps: &[PreparationStep]) -> Result<(), GrdbError> {
        let stored = self
            .recipes
            .get_mut(&id)
            .ok_or(GrdbError::RecipeNotFound(id))?;
        stored.steps = steps.to_vec();
        Ok(())
    }

    fn delete_recipe(&mut self, id: RecipeId) -> Result<bool, GrdbError> {
        if !self.recipes.contains_key(&id) {
            return Ok(false);
        }
        if self.is_referenced(id) {
            return Err(GrdbError::RecipeInUse(id));
        }
        // Steps are owned by the recipe entry and go with it.
        Ok(self.recipes.remove(&id).is_some())
    }

    fn recipe_count(&self) -> Result<usize, GrdbError> {
        Ok(self.recipes.len())
    }

    fn step_count(&self) -> Result<usize, GrdbError> {
        Ok(self.recipes.values().map(|r| r.steps.len()).sum())
    }

    fn insert_experiment(&mut self, experiment: &NewExperiment) -> Result<ExperimentId, GrdbError> {
        if let Some(recipe) = experiment.recipe_id {
            self.stored(recipe)?;
        }

        self.last_experiment_id = self.last_experiment_id.saturating_add(1);
        let id = ExperimentId(self.last_experiment_id);

        let mut files = BTreeMap::new();
        for file in &experiment.raman_files {
            self.last_raman_file_id = self.last_raman_file_id.saturating_add(1);
            let file_id = RamanFileId(self.last_raman_file_id);
            files.insert(file_id, RamanFile::from_new(file_id, id, file.clone()));
            self.raman_index.insert(file_id, id);
        }

        self.experiments.insert(
            id,
            StoredExperiment {
                header: ExperimentHeader {
                    recipe_id: experiment.recipe_id,
                    substrate: experiment.substrate.clone(),
                },
                files,
            },
        );
        Ok(id)
    }

    fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, GrdbError> {
        Ok(self.experiments.get(&id).map(|e| Experiment {
            id,
            recipe_id: e.header.recipe_id,
            substrate: e.header.substrate.clone(),
            raman_files: e.files.values().cloned().collect(),
        }))
    }

    fn delete_experiment(&mut self, id: ExperimentId) -> Result<bool, GrdbError> {
        let Some(removed) = self.experiments.remove(&id) else {
            return Ok(false);
        };
        for file_id in removed.files.keys() {
            self.raman_index.remove(file_id);
        }
        Ok(true)
    }

    fn raman_file(&self, id: RamanFileId) -> Result<Option<RamanFile>, GrdbError> {
        Ok(self
            .raman_index
            .get(&id)
            .and_then(|exp| self.experiments.get(exp))
            .and_then(|e| e.files.get(&id))
            .cloned())
    }

    fn set_raman_url(&mut self, id: RamanFileId, url: &str) -> Result<(), GrdbError> {
        let file = self
            .raman_index
            .get(&id)
            .and_then(|exp| self.experiments.get_mut(exp))
            .and_then(|e| e.files.get_mut(&id))
            .ok_or(GrdbError::RamanFileNotFound(id))?;
        file.url = Some(url.to_string());
        Ok(())
    }

    fn raman_file_count(&self) -> Result<usize, GrdbError> {
        Ok(self.raman_index.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;
    use crate::pushdown::QueryPushdownCompiler;
    use crate::{Measurement, NewRamanFile};

    fn growing(duration: f64) -> PreparationStep {
        let mut step = PreparationStep::named("Growing");
        step.duration = Some(Measurement::new(duration, "min"));
        step
    }

    fn compile(name: &str) -> AggregateExpression {
        let registry = MetricRegistry::standard().expect("valid registry");
        QueryPushdownCompiler::compile(registry.require(name).expect("registered"))
    }

    #[test]
    fn insert_and_load_recipe() {
        let mut store = MemoryStore::new();
        let id = store
            .insert_recipe(&NewRecipe::with_steps(vec![growing(5.0), growing(7.0)]))
            .expect("insert");
        assert_eq!(id, RecipeId(1));

        let recipe = store.recipe(id).expect("load").expect("exists");
        assert_eq!(recipe.preparation_steps.len(), 2);
        assert_eq!(store.step_count().expect("count"), 2);
    }

    #[test]
    fn pushdown_on_missing_recipe() {
        let store = MemoryStore::new();
        let err = compile("growth_duration")
            .evaluate_against_store(&store, RecipeId(9))
            .expect_err("missing");
        assert_eq!(err, GrdbError::RecipeNotFound(RecipeId(9)));
    }

    #[test]
    fn grouped_execution_covers_every_recipe() {
        let mut store = MemoryStore::new();
        let a = store
            .insert_recipe(&NewRecipe::with_steps(vec![growing(5.0)]))
            .expect("insert");
        let b = store.insert_recipe(&NewRecipe::default()).expect("insert");

        let grouped = store
            .execute_grouped(&compile("growth_duration"))
            .expect("grouped");
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&a], Ok(Some(MetricValue::Number(5.0))));
        assert_eq!(grouped[&b], Ok(None));
    }

    #[test]
    fn delete_recipe_cascades_steps() {
        let mut store = MemoryStore::new();
        let id = store
            .insert_recipe(&NewRecipe::with_steps(vec![growing(1.0), growing(2.0)]))
            .expect("insert");
        assert!(store.delete_recipe(id).expect("delete"));
        assert_eq!(store.step_count().expect("count"), 0);
        assert!(!store.delete_recipe(id).expect("second delete"));
        assert!(matches!(
            store.steps_for_recipe(id),
            Err(GrdbError::RecipeNotFound(_))
        ));
    }

    #[test]
    fn referenced_recipe_cannot_be_deleted() {
        let mut store = MemoryStore::new();
        let recipe = store.insert_recipe(&NewRecipe::default()).expect("insert");
        let exp = store
            .insert_experiment(&NewExperiment {
                recipe_id: Some(recipe),
                ..NewExperiment::default()
            })
            .expect("experiment");

        assert_eq!(
            store.delete_recipe(recipe),
            Err(GrdbError::RecipeInUse(recipe))
        );
        assert!(store.delete_experiment(exp).expect("delete experiment"));
        assert!(store.delete_recipe(recipe).expect("delete recipe"));
    }

    #[test]
    fn delete_experiment_cascades_raman_files() {
        let mut store = MemoryStore::new();
        let exp = store
            .insert_experiment(&NewExperiment {
                raman_files: vec![
                    NewRamanFile {
                        filename: "a.txt".to_string(),
                        ..NewRamanFile::default()
                    },
                    NewRamanFile {
                        filename: "b.txt".to_string(),
                        ..NewRamanFile::default()
                    },
                ],
                ..NewExperiment::default()
            })
            .expect("insert");
        assert_eq!(store.raman_file_count().expect("count"), 2);

        assert!(store.delete_experiment(exp).expect("delete"));
        assert_eq!(store.raman_file_count().expect("count"), 0);
        assert_eq!(store.raman_file(RamanFileId(1)).expect("lookup"), None);
    }

    #[test]
    fn experiment_requires_existing_recipe() {
        let mut store = MemoryStore::new();
        let err = store
            .insert_experiment(&NewExperiment {
                recipe_id: Some(RecipeId(42)),
                ..NewExperiment::default()
            })
            .expect_err("dangling recipe");
        assert_eq!(err, GrdbError::RecipeNotFound(RecipeId(42)));
    }

    #[test]
    fn raman_url_is_cached() {
        let mut store = MemoryStore::new();
        store
            .insert_experiment(&NewExperiment {
                raman_files: vec![NewRamanFile {
                    filename: "a.txt".to_string(),
                    s3_object_name: Some("raman/a.txt".to_string()),
                    ..NewRamanFile::default()
                }],
                ..NewExperiment::default()
            })
            .expect("insert");

        store
            .set_raman_url(RamanFileId(1), "https://example.org/a.txt")
            .expect("set url");
        let file = store.raman_file(RamanFileId(1)).expect("load").expect("exists");
        assert_eq!(file.url.as_deref(), Some("https://example.org/a.txt"));

        assert_eq!(
            store.set_raman_url(RamanFileId(7), "x"),
            Err(GrdbError::RamanFileNotFound(RamanFileId(7)))
        );
    }

    #[test]
    fn replace_steps_keeps_header() {
        let mut store = MemoryStore::new();
        let id = store
            .insert_recipe(&NewRecipe {
                carbon_source: Some("CH4".to_string()),
                base_pressure: None,
                preparation_steps: vec![growing(1.0)],
            })
            .expect("insert");
        store
            .replace_steps(id, &[growing(3.0), growing(4.0)])
            .expect("replace");
        let recipe = store.recipe(id).expect("load").expect("exists");
        assert_eq!(recipe.carbon_source.as_deref(), Some("CH4"));
        assert_eq!(recipe.preparation_steps.len(), 2);
    }
}
