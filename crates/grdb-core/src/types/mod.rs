//! # Core Type Definitions
//!
//! This module contains the entity types of the recipe database:
//! - Identifiers (`RecipeId`, `ExperimentId`, `RamanFileId`)
//! - Measured values (`Measurement`)
//! - The recipe graph (`Recipe`, `PreparationStep`, `NewRecipe`)
//! - Sibling entities (`Substrate`, `Experiment`, `RamanFile`)
//! - Error types (`GrdbError`)
//!
//! ## Ownership
//!
//! A `Recipe` owns its ordered `Vec<PreparationStep>`. Steps carry no
//! back-reference; the owning recipe is whichever one holds them, and the
//! position in the vector is the step order.

use crate::units::UnitTable;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a stored recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipeId(pub u64);

/// Identifier of a stored experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExperimentId(pub u64);

/// Identifier of a stored Raman file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RamanFileId(pub u64);

// =============================================================================
// MEASUREMENT
// =============================================================================

/// A measured value together with the unit it was recorded in.
///
/// The unit must be one of the units accepted by the field's `UnitTable`;
/// the value is only ever read through [`Measurement::to_standard`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
}

impl Measurement {
    /// Create a new measurement.
    #[must_use]
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// Create a measurement already expressed in the table's standard unit.
    #[must_use]
    pub fn standard(value: f64, table: &UnitTable) -> Self {
        Self::new(value, table.standard)
    }

    /// The value expressed in the table's standard unit.
    pub fn to_standard(&self, table: &UnitTable) -> Result<f64, GrdbError> {
        table.to_standard(self.value, &self.unit)
    }
}

// =============================================================================
// PREPARATION STEP
// =============================================================================

/// One ordered stage of a recipe's process.
///
/// Every measurement is nullable; `None` means "not recorded".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparationStep {
    /// Step type, e.g. "Annealing" or "Growing".
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub furnace_temperature: Option<Measurement>,
    #[serde(default)]
    pub furnace_pressure: Option<Measurement>,
    #[serde(default)]
    pub carbon_source: Option<String>,
    #[serde(default)]
    pub carbon_source_flow_rate: Option<Measurement>,
    #[serde(default)]
    pub hydrogen_flow_rate: Option<Measurement>,
    #[serde(default)]
    pub helium_flow_rate: Option<Measurement>,
    #[serde(default)]
    pub argon_flow_rate: Option<Measurement>,
    #[serde(default)]
    pub duration: Option<Measurement>,
}

impl PreparationStep {
    /// Create an empty step with the given step type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// RECIPE
// =============================================================================

/// A recipe as submitted for storage (no identifier yet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecipe {
    #[serde(default)]
    pub carbon_source: Option<String>,
    #[serde(default)]
    pub base_pressure: Option<Measurement>,
    #[serde(default)]
    pub preparation_steps: Vec<PreparationStep>,
}

impl NewRecipe {
    /// Create a recipe from its ordered steps.
    #[must_use]
    pub fn with_steps(preparation_steps: Vec<PreparationStep>) -> Self {
        Self {
            preparation_steps,
            ..Self::default()
        }
    }
}

/// A stored recipe with its ordered preparation steps.
///
/// Derived metrics are never stored here; they are projections computed by
/// the evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub carbon_source: Option<String>,
    pub base_pressure: Option<Measurement>,
    pub preparation_steps: Vec<PreparationStep>,
}

/// The recipe-level stored fields (everything but the steps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeHeader {
    pub carbon_source: Option<String>,
    pub base_pressure: Option<Measurement>,
}

impl Recipe {
    /// Assemble a recipe from its stored header and steps.
    #[must_use]
    pub fn from_parts(id: RecipeId, header: RecipeHeader, steps: Vec<PreparationStep>) -> Self {
        Self {
            id,
            carbon_source: header.carbon_source,
            base_pressure: header.base_pressure,
            preparation_steps: steps,
        }
    }
}

impl From<&NewRecipe> for RecipeHeader {
    fn from(recipe: &NewRecipe) -> Self {
        Self {
            carbon_source: recipe.carbon_source.clone(),
            base_pressure: recipe.base_pressure.clone(),
        }
    }
}

// =============================================================================
// SUBSTRATE / EXPERIMENT / RAMAN FILE
// =============================================================================

/// The catalyst substrate used by an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Substrate {
    #[serde(default)]
    pub catalyst: Option<String>,
    #[serde(default)]
    pub thickness: Option<Measurement>,
    #[serde(default)]
    pub diameter: Option<Measurement>,
    #[serde(default)]
    pub length: Option<Measurement>,
    #[serde(default)]
    pub surface_area: Option<Measurement>,
}

/// A Raman file record as submitted with an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRamanFile {
    pub filename: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub s3_object_name: Option<String>,
    #[serde(default)]
    pub wavelength: Option<Measurement>,
}

/// A stored Raman spectroscopy file record.
///
/// The spectrum itself lives in object storage; `url` caches a signed
/// access URL once one has been resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamanFile {
    pub id: RamanFileId,
    pub experiment_id: ExperimentId,
    pub filename: String,
    pub url: Option<String>,
    pub s3_object_name: Option<String>,
    pub wavelength: Option<Measurement>,
}

impl RamanFile {
    /// Attach identifiers to a submitted file record.
    #[must_use]
    pub fn from_new(id: RamanFileId, experiment_id: ExperimentId, file: NewRamanFile) -> Self {
        Self {
            id,
            experiment_id,
            filename: file.filename,
            url: file.url,
            s3_object_name: file.s3_object_name,
            wavelength: file.wavelength,
        }
    }
}

/// An experiment as submitted for storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewExperiment {
    #[serde(default)]
    pub recipe_id: Option<RecipeId>,
    #[serde(default)]
    pub substrate: Option<Substrate>,
    #[serde(default)]
    pub raman_files: Vec<NewRamanFile>,
}

/// A stored experiment and the Raman files it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub recipe_id: Option<RecipeId>,
    pub substrate: Option<Substrate>,
    pub raman_files: Vec<RamanFile>,
}

/// The experiment-level stored fields (everything but the Raman files).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentHeader {
    pub recipe_id: Option<RecipeId>,
    pub substrate: Option<Substrate>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the grdb engine.
///
/// - No silent failures: every failure is a variant or a documented `None`
/// - An undefined metric is `Ok(None)`, never an error
/// - The engine never panics; all errors are recoverable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrdbError {
    /// A measurement uses a unit absent from its field's conversion table.
    #[error("Unknown unit '{unit}' for {field}")]
    UnknownUnit { field: String, unit: String },

    /// A time-series line is not exactly two floating point numbers.
    #[error("Malformed remote data at line {line}: {reason}")]
    MalformedRemoteData { line: usize, reason: String },

    /// The step store could not answer a read or write.
    #[error("Step store unavailable: {0}")]
    StoreUnavailable(String),

    /// A unit table failed start-up validation.
    #[error("Invalid unit table '{table}': {reason}")]
    InvalidUnitTable { table: String, reason: String },

    /// A metric definition failed start-up validation.
    #[error("Invalid metric definition '{name}': {reason}")]
    InvalidMetric { name: String, reason: String },

    /// No metric with this name is registered.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// The requested recipe does not exist.
    #[error("Recipe not found: {0:?}")]
    RecipeNotFound(RecipeId),

    /// The recipe is still referenced by at least one experiment.
    #[error("Recipe {0:?} is referenced by an experiment")]
    RecipeInUse(RecipeId),

    /// The requested experiment does not exist.
    #[error("Experiment not found: {0:?}")]
    ExperimentNotFound(ExperimentId),

    /// The requested Raman file does not exist.
    #[error("Raman file not found: {0:?}")]
    RamanFileNotFound(RamanFileId),

    /// Submitted data was rejected by validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote retrieval failed before any data could be parsed.
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
