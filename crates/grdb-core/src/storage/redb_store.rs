//! # redb-backed Recipe Storage
//!
//! A disk-backed recipe store using the redb embedded database.
//!
//! Steps are stored column-wise: one table for the step labels keyed by
//! `(recipe, position)` and one table for every measurement keyed by
//! `(recipe, field code, position)`. A compiled aggregate expression then
//! range-scans only the columns in its projection, which is what makes the
//! pushdown path cheaper than loading whole steps.
//!
//! Every read opens exactly one read transaction, so a metric, a grouped
//! scan or a steps listing always observes one consistent snapshot.

use crate::fields::StepField;
use crate::metrics::MetricOutcome;
use crate::pushdown::{AggregateExpression, ColumnRow};
use crate::store::{RecipeStore, StepStore};
use crate::{
    Experiment, ExperimentHeader, ExperimentId, GrdbError, Measurement, MetricValue,
    NewExperiment, NewRecipe, PreparationStep, RamanFile, RamanFileId, Recipe, RecipeHeader,
    RecipeId,
};
use redb::{
    Database, ReadOnlyTable, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table,
    TableDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Table for recipes: RecipeId(u64) -> serialized RecipeHeader
const RECIPES: TableDefinition<u64, &[u8]> = TableDefinition::new("recipes");

/// Table for step labels: (recipe_id, position) -> serialized StepLabels
const STEPS: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("steps");

/// Table for step measurements: (recipe_id, field code, position) -> serialized Measurement
const MEASUREMENTS: TableDefinition<(u64, u8, u32), &[u8]> = TableDefinition::new("measurements");

/// Table for experiments: ExperimentId(u64) -> serialized ExperimentHeader
const EXPERIMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("experiments");

/// Table for recipe references: (recipe_id, experiment_id) -> ()
const RECIPE_REFS: TableDefinition<(u64, u64), ()> = TableDefinition::new("recipe_refs");

/// Table for Raman files: (experiment_id, file_id) -> serialized RamanFile
const RAMAN_FILES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("raman_files");

/// Table for Raman file index: RamanFileId(u64) -> ExperimentId(u64)
const RAMAN_INDEX: TableDefinition<u64, u64> = TableDefinition::new("raman_index");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_RECIPE_ID: &str = "last_recipe_id";
const LAST_EXPERIMENT_ID: &str = "last_experiment_id";
const LAST_RAMAN_FILE_ID: &str = "last_raman_file_id";

/// The non-numeric part of a step row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StepLabels {
    name: Option<String>,
    carbon_source: Option<String>,
}

fn unavailable(e: impl std::fmt::Display) -> GrdbError {
    GrdbError::StoreUnavailable(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GrdbError> {
    postcard::to_allocvec(value).map_err(|e| GrdbError::SerializationError(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, GrdbError> {
    postcard::from_bytes(bytes).map_err(|e| GrdbError::SerializationError(e.to_string()))
}

/// A disk-backed recipe store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a recipe database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GrdbError> {
        let db = Database::create(path.as_ref()).map_err(unavailable)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(unavailable)?;
            let _ = write_txn.open_table(RECIPES).map_err(unavailable)?;
            let _ = write_txn.open_table(STEPS).map_err(unavailable)?;
            let _ = write_txn.open_table(MEASUREMENTS).map_err(unavailable)?;
            let _ = write_txn.open_table(EXPERIMENTS).map_err(unavailable)?;
            let _ = write_txn.open_table(RECIPE_REFS).map_err(unavailable)?;
            let _ = write_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
            let _ = write_txn.open_table(RAMAN_INDEX).map_err(unavailable)?;
            let _ = write_txn.open_table(METADATA).map_err(unavailable)?;
            write_txn.commit().map_err(unavailable)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "opened redb recipe store");
        Ok(Self { db })
    }

    /// Compact the database (optional optimization).
    pub fn compact(&mut self) -> Result<(), GrdbError> {
        self.db.compact().map_err(unavailable)?;
        Ok(())
    }

    fn recipe_exists(&self, id: RecipeId) -> Result<bool, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        Ok(recipes.get(id.0).map_err(unavailable)?.is_some())
    }

    fn is_referenced(&self, id: RecipeId) -> Result<bool, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let refs = read_txn.open_table(RECIPE_REFS).map_err(unavailable)?;
        let mut range = refs
            .range((id.0, 0u64)..=(id.0, u64::MAX))
            .map_err(unavailable)?;
        Ok(range.next().transpose().map_err(unavailable)?.is_some())
    }
}

// =============================================================================
// READ HELPERS (one read transaction per call site)
// =============================================================================

type StepsTable = ReadOnlyTable<(u64, u32), &'static [u8]>;
type MeasurementsTable = ReadOnlyTable<(u64, u8, u32), &'static [u8]>;

/// Load one recipe's projected rows, in step order.
///
/// Only the step-name column and the expression's columns are read.
fn load_projection(
    steps: &StepsTable,
    measurements: &MeasurementsTable,
    expr: &AggregateExpression,
    recipe: u64,
) -> Result<Vec<ColumnRow>, GrdbError> {
    let mut rows: BTreeMap<u32, ColumnRow> = BTreeMap::new();
    for entry in steps
        .range((recipe, 0u32)..=(recipe, u32::MAX))
        .map_err(unavailable)?
    {
        let (key, value) = entry.map_err(unavailable)?;
        let (_, pos) = key.value();
        let name = if expr.reads_name() {
            decode::<StepLabels>(value.value())?.name
        } else {
            None
        };
        rows.insert(pos, ColumnRow::new(name));
    }

    for field in expr.columns() {
        let code = field.code();
        for entry in measurements
            .range((recipe, code, 0u32)..=(recipe, code, u32::MAX))
            .map_err(unavailable)?
        {
            let (key, value) = entry.map_err(unavailable)?;
            let (_, _, pos) = key.value();
            if let Some(row) = rows.get_mut(&pos) {
                row.set(*field, Some(decode::<Measurement>(value.value())?));
            }
        }
    }

    Ok(rows.into_values().collect())
}

/// Load one recipe's full steps, in step order.
fn load_steps(
    steps: &StepsTable,
    measurements: &MeasurementsTable,
    recipe: u64,
) -> Result<Vec<PreparationStep>, GrdbError> {
    let mut loaded: BTreeMap<u32, PreparationStep> = BTreeMap::new();
    for entry in steps
        .range((recipe, 0u32)..=(recipe, u32::MAX))
        .map_err(unavailable)?
    {
        let (key, value) = entry.map_err(unavailable)?;
        let (_, pos) = key.value();
        let labels: StepLabels = decode(value.value())?;
        loaded.insert(
            pos,
            PreparationStep {
                name: labels.name,
                carbon_source: labels.carbon_source,
                ..PreparationStep::default()
            },
        );
    }

    for entry in measurements
        .range((recipe, 0u8, 0u32)..=(recipe, u8::MAX, u32::MAX))
        .map_err(unavailable)?
    {
        let (key, value) = entry.map_err(unavailable)?;
        let (_, code, pos) = key.value();
        let field = StepField::from_code(code).ok_or_else(|| {
            GrdbError::SerializationError(format!("unknown field code {}", code))
        })?;
        if let Some(step) = loaded.get_mut(&pos) {
            *field.slot(step) = Some(decode(value.value())?);
        }
    }

    Ok(loaded.into_values().collect())
}

// =============================================================================
// WRITE HELPERS
// =============================================================================

fn next_id(meta: &mut Table<'_, &'static str, u64>, key: &str) -> Result<u64, GrdbError> {
    let last = meta
        .get(key)
        .map_err(unavailable)?
        .map(|v| v.value())
        .unwrap_or(0);
    let next = last.saturating_add(1);
    meta.insert(key, next).map_err(unavailable)?;
    Ok(next)
}

fn write_steps(
    steps_table: &mut Table<'_, (u64, u32), &'static [u8]>,
    meas_table: &mut Table<'_, (u64, u8, u32), &'static [u8]>,
    recipe: u64,
    steps: &[PreparationStep],
) -> Result<(), GrdbError> {
    for (pos, step) in steps.iter().enumerate() {
        let pos = u32::try_from(pos)
            .map_err(|_| GrdbError::InvalidInput("too many preparation steps".to_string()))?;
        let labels = encode(&StepLabels {
            name: step.name.clone(),
            carbon_source: step.carbon_source.clone(),
        })?;
        steps_table
            .insert((recipe, pos), labels.as_slice())
            .map_err(unavailable)?;

        for field in StepField::ALL {
            if let Some(m) = field.get(step) {
                let bytes = encode(m)?;
                meas_table
                    .insert((recipe, field.code(), pos), bytes.as_slice())
                    .map_err(unavailable)?;
            }
        }
    }
    Ok(())
}

fn clear_steps(
    steps_table: &mut Table<'_, (u64, u32), &'static [u8]>,
    meas_table: &mut Table<'_, (u64, u8, u32), &'static [u8]>,
    recipe: u64,
) -> Result<(), GrdbError> {
    let step_keys: Vec<(u64, u32)> = steps_table
        .range((recipe, 0u32)..=(recipe, u32::MAX))
        .map_err(unavailable)?
        .map(|entry| entry.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()
        .map_err(unavailable)?;
    for key in step_keys {
        steps_table.remove(key).map_err(unavailable)?;
    }

    let meas_keys: Vec<(u64, u8, u32)> = meas_table
        .range((recipe, 0u8, 0u32)..=(recipe, u8::MAX, u32::MAX))
        .map_err(unavailable)?
        .map(|entry| entry.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()
        .map_err(unavailable)?;
    for key in meas_keys {
        meas_table.remove(key).map_err(unavailable)?;
    }
    Ok(())
}

// =============================================================================
// STEP STORE
// =============================================================================

impl StepStore for RedbStore {
    fn recipe_ids(&self) -> Result<Vec<RecipeId>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        let mut ids = Vec::new();
        for entry in recipes.iter().map_err(unavailable)? {
            let (key, _) = entry.map_err(unavailable)?;
            ids.push(RecipeId(key.value()));
        }
        Ok(ids)
    }

    fn steps_for_recipe(&self, recipe: RecipeId) -> Result<Vec<PreparationStep>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        if recipes.get(recipe.0).map_err(unavailable)?.is_none() {
            return Err(GrdbError::RecipeNotFound(recipe));
        }
        let steps = read_txn.open_table(STEPS).map_err(unavailable)?;
        let measurements = read_txn.open_table(MEASUREMENTS).map_err(unavailable)?;
        load_steps(&steps, &measurements, recipe.0)
    }

    fn execute_aggregate(
        &self,
        expr: &AggregateExpression,
        recipe: RecipeId,
    ) -> Result<Option<MetricValue>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        if recipes.get(recipe.0).map_err(unavailable)?.is_none() {
            return Err(GrdbError::RecipeNotFound(recipe));
        }
        let steps = read_txn.open_table(STEPS).map_err(unavailable)?;
        let measurements = read_txn.open_table(MEASUREMENTS).map_err(unavailable)?;

        let rows = load_projection(&steps, &measurements, expr, recipe.0)?;
        expr.fold_rows(rows.into_iter().map(Ok::<_, GrdbError>))
    }

    fn execute_grouped(
        &self,
        expr: &AggregateExpression,
    ) -> Result<BTreeMap<RecipeId, MetricOutcome>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        let steps = read_txn.open_table(STEPS).map_err(unavailable)?;
        let measurements = read_txn.open_table(MEASUREMENTS).map_err(unavailable)?;

        let mut grouped = BTreeMap::new();
        for entry in recipes.iter().map_err(unavailable)? {
            let (key, _) = entry.map_err(unavailable)?;
            let id = key.value();
            let rows = load_projection(&steps, &measurements, expr, id)?;
            grouped.insert(
                RecipeId(id),
                expr.fold_rows(rows.into_iter().map(Ok::<_, GrdbError>)),
            );
        }
        tracing::debug!(
            metric = expr.name(),
            recipes = grouped.len(),
            "grouped aggregate scan"
        );
        Ok(grouped)
    }
}

// =============================================================================
// RECIPE STORE
// =============================================================================

impl RecipeStore for RedbStore {
    fn insert_recipe(&mut self, recipe: &NewRecipe) -> Result<RecipeId, GrdbError> {
        let header = encode(&RecipeHeader::from(recipe))?;

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let id = {
            let mut meta = write_txn.open_table(METADATA).map_err(unavailable)?;
            let mut recipes = write_txn.open_table(RECIPES).map_err(unavailable)?;
            let mut steps = write_txn.open_table(STEPS).map_err(unavailable)?;
            let mut measurements = write_txn.open_table(MEASUREMENTS).map_err(unavailable)?;

            let id = next_id(&mut meta, LAST_RECIPE_ID)?;
            recipes.insert(id, header.as_slice()).map_err(unavailable)?;
            write_steps(&mut steps, &mut measurements, id, &recipe.preparation_steps)?;
            id
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(RecipeId(id))
    }

    fn recipe(&self, id: RecipeId) -> Result<Option<Recipe>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        let Some(data) = recipes.get(id.0).map_err(unavailable)? else {
            return Ok(None);
        };
        let header: RecipeHeader = decode(data.value())?;
        let steps = read_txn.open_table(STEPS).map_err(unavailable)?;
        let measurements = read_txn.open_table(MEASUREMENTS).map_err(unavailable)?;
        let loaded = load_steps(&steps, &measurements, id.0)?;
        Ok(Some(Recipe::from_parts(id, header, loaded)))
    }

    fn recipe_header(&self, id: RecipeId) -> Result<Option<RecipeHeader>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        recipes
            .get(id.0)
            .map_err(unavailable)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    fn replace_steps(&mut self, id: RecipeId, steps: &[PreparationStep]) -> Result<(), GrdbError> {
        if !self.recipe_exists(id)? {
            return Err(GrdbError::RecipeNotFound(id));
        }

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut steps_table = write_txn.open_table(STEPS).map_err(unavailable)?;
            let mut meas_table = write_txn.open_table(MEASUREMENTS).map_err(unavailable)?;
            clear_steps(&mut steps_table, &mut meas_table, id.0)?;
            write_steps(&mut steps_table, &mut meas_table, id.0, steps)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(())
    }

    fn delete_recipe(&mut self, id: RecipeId) -> Result<bool, GrdbError> {
        if !self.recipe_exists(id)? {
            return Ok(false);
        }
        if self.is_referenced(id)? {
            return Err(GrdbError::RecipeInUse(id));
        }

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut recipes = write_txn.open_table(RECIPES).map_err(unavailable)?;
            let mut steps_table = write_txn.open_table(STEPS).map_err(unavailable)?;
            let mut meas_table = write_txn.open_table(MEASUREMENTS).map_err(unavailable)?;
            recipes.remove(id.0).map_err(unavailable)?;
            clear_steps(&mut steps_table, &mut meas_table, id.0)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(true)
    }

    fn recipe_count(&self) -> Result<usize, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let recipes = read_txn.open_table(RECIPES).map_err(unavailable)?;
        Ok(recipes.len().map_err(unavailable)? as usize)
    }

    fn step_count(&self) -> Result<usize, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let steps = read_txn.open_table(STEPS).map_err(unavailable)?;
        Ok(steps.len().map_err(unavailable)? as usize)
    }

    fn insert_experiment(&mut self, experiment: &NewExperiment) -> Result<ExperimentId, GrdbError> {
        if let Some(recipe) = experiment.recipe_id {
            if !self.recipe_exists(recipe)? {
                return Err(GrdbError::RecipeNotFound(recipe));
            }
        }
        let header = encode(&ExperimentHeader {
            recipe_id: experiment.recipe_id,
            substrate: experiment.substrate.clone(),
        })?;

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let id = {
            let mut meta = write_txn.open_table(METADATA).map_err(unavailable)?;
            let mut experiments = write_txn.open_table(EXPERIMENTS).map_err(unavailable)?;
            let mut refs = write_txn.open_table(RECIPE_REFS).map_err(unavailable)?;
            let mut files = write_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
            let mut index = write_txn.open_table(RAMAN_INDEX).map_err(unavailable)?;

            let id = next_id(&mut meta, LAST_EXPERIMENT_ID)?;
            experiments
                .insert(id, header.as_slice())
                .map_err(unavailable)?;
            if let Some(recipe) = experiment.recipe_id {
                refs.insert((recipe.0, id), ()).map_err(unavailable)?;
            }

            for file in &experiment.raman_files {
                let file_id = next_id(&mut meta, LAST_RAMAN_FILE_ID)?;
                let record =
                    RamanFile::from_new(RamanFileId(file_id), ExperimentId(id), file.clone());
                let bytes = encode(&record)?;
                files
                    .insert((id, file_id), bytes.as_slice())
                    .map_err(unavailable)?;
                index.insert(file_id, id).map_err(unavailable)?;
            }
            id
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(ExperimentId(id))
    }

    fn experiment(&self, id: ExperimentId) -> Result<Option<Experiment>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let experiments = read_txn.open_table(EXPERIMENTS).map_err(unavailable)?;
        let Some(data) = experiments.get(id.0).map_err(unavailable)? else {
            return Ok(None);
        };
        let header: ExperimentHeader = decode(data.value())?;

        let files = read_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
        let mut raman_files = Vec::new();
        for entry in files
            .range((id.0, 0u64)..=(id.0, u64::MAX))
            .map_err(unavailable)?
        {
            let (_, value) = entry.map_err(unavailable)?;
            raman_files.push(decode::<RamanFile>(value.value())?);
        }

        Ok(Some(Experiment {
            id,
            recipe_id: header.recipe_id,
            substrate: header.substrate,
            raman_files,
        }))
    }

    fn delete_experiment(&mut self, id: ExperimentId) -> Result<bool, GrdbError> {
        let write_txn = self.db.begin_write().map_err(unavailable)?;
        let deleted = {
            let mut experiments = write_txn.open_table(EXPERIMENTS).map_err(unavailable)?;
            let removed = experiments.remove(id.0).map_err(unavailable)?;
            match removed {
                None => false,
                Some(data) => {
                    let header: ExperimentHeader = decode(data.value())?;
                    drop(data);

                    let mut refs = write_txn.open_table(RECIPE_REFS).map_err(unavailable)?;
                    if let Some(recipe) = header.recipe_id {
                        refs.remove((recipe.0, id.0)).map_err(unavailable)?;
                    }

                    let mut files = write_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
                    let mut index = write_txn.open_table(RAMAN_INDEX).map_err(unavailable)?;
                    let keys: Vec<(u64, u64)> = files
                        .range((id.0, 0u64)..=(id.0, u64::MAX))
                        .map_err(unavailable)?
                        .map(|entry| entry.map(|(k, _)| k.value()))
                        .collect::<Result<_, _>>()
                        .map_err(unavailable)?;
                    for key in keys {
                        files.remove(key).map_err(unavailable)?;
                        index.remove(key.1).map_err(unavailable)?;
                    }
                    true
                }
            }
        };
        write_txn.commit().map_err(unavailable)?;
        Ok(deleted)
    }

    fn raman_file(&self, id: RamanFileId) -> Result<Option<RamanFile>, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let index = read_txn.open_table(RAMAN_INDEX).map_err(unavailable)?;
        let Some(experiment) = index.get(id.0).map_err(unavailable)?.map(|v| v.value()) else {
            return Ok(None);
        };
        let files = read_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
        files
            .get((experiment, id.0))
            .map_err(unavailable)?
            .map(|data| decode(data.value()))
            .transpose()
    }

    fn set_raman_url(&mut self, id: RamanFileId, url: &str) -> Result<(), GrdbError> {
        let mut record = self
            .raman_file(id)?
            .ok_or(GrdbError::RamanFileNotFound(id))?;
        record.url = Some(url.to_string());
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write().map_err(unavailable)?;
        {
            let mut files = write_txn.open_table(RAMAN_FILES).map_err(unavailable)?;
            files
                .insert((record.experiment_id.0, id.0), bytes.as_slice())
                .map_err(unavailable)?;
        }
        write_txn.commit().map_err(unavailable)?;
        Ok(())
    }

    fn raman_file_count(&self) -> Result<usize, GrdbError> {
        let read_txn = self.db.begin_read().map_err(unavailable)?;
        let index = read_txn.open_table(RAMAN_INDEX).map_err(unavailable)?;
        Ok(index.len().map_err(unavailable)? as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================
