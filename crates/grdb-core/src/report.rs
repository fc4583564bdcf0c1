//! # Report Projection
//!
//! The JSON-facing projection of stored records and derived metrics.
//!
//! Every measured quantity is reported as `{value, unit}` in its standard
//! unit, never as a unit-less number. A metric is reported as `{value,
//! unit}` where `value` is `null` when the metric is undefined. A conversion
//! failure is confined to its own entry, which then carries an `error`.

use crate::fields::StepField;
use crate::metrics::{MetricDefinition, MetricOutcome, MetricValue};
use crate::units::{AREA, LENGTH, PRESSURE, THICKNESS, UnitTable, WAVELENGTH};
use crate::{
    Experiment, ExperimentId, Measurement, PreparationStep, RamanFile, RamanFileId, Recipe,
    RecipeId, Substrate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// QUANTITIES
// =============================================================================

/// A stored measurement in its standard unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityReport {
    pub value: Option<f64>,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuantityReport {
    /// Project a nullable measurement through its unit table.
    #[must_use]
    pub fn project(measurement: Option<&Measurement>, table: &UnitTable) -> Self {
        let (value, error) = match measurement.map(|m| m.to_standard(table)).transpose() {
            Ok(value) => (value, None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            value,
            unit: table.standard.to_string(),
            error,
        }
    }

    fn field(step: &PreparationStep, field: StepField) -> Self {
        match field.get(step).map(|m| field.to_standard(m)).transpose() {
            Ok(value) => Self {
                value,
                unit: field.units().standard.to_string(),
                error: None,
            },
            Err(e) => Self {
                value: None,
                unit: field.units().standard.to_string(),
                error: Some(e.to_string()),
            },
        }
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// One derived metric of one recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub value: Option<MetricValue>,
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricReport {
    #[must_use]
    pub fn from_outcome(def: &MetricDefinition, outcome: &MetricOutcome) -> Self {
        let (value, error) = match outcome {
            Ok(value) => (*value, None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            value,
            unit: def.standard_unit.map(str::to_string),
            error,
        }
    }
}

// =============================================================================
// RECIPES
// =============================================================================

/// One preparation step with every quantity in its standard unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: Option<String>,
    pub carbon_source: Option<String>,
    pub furnace_temperature: QuantityReport,
    pub furnace_pressure: QuantityReport,
    pub carbon_source_flow_rate: QuantityReport,
    pub hydrogen_flow_rate: QuantityReport,
    pub helium_flow_rate: QuantityReport,
    pub argon_flow_rate: QuantityReport,
    pub duration: QuantityReport,
}

impl From<&PreparationStep> for StepReport {
    fn from(step: &PreparationStep) -> Self {
        Self {
            name: step.name.clone(),
            carbon_source: step.carbon_source.clone(),
            furnace_temperature: QuantityReport::field(step, StepField::FurnaceTemperature),
            furnace_pressure: QuantityReport::field(step, StepField::FurnacePressure),
            carbon_source_flow_rate: QuantityReport::field(step, StepField::CarbonSourceFlowRate),
            hydrogen_flow_rate: QuantityReport::field(step, StepField::HydrogenFlowRate),
            helium_flow_rate: QuantityReport::field(step, StepField::HeliumFlowRate),
            argon_flow_rate: QuantityReport::field(step, StepField::ArgonFlowRate),
            duration: QuantityReport::field(step, StepField::Duration),
        }
    }
}

/// A recipe with its derived metrics, optionally with its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeReport {
    pub id: RecipeId,
    pub carbon_source: Option<String>,
    pub base_pressure: QuantityReport,
    pub metrics: BTreeMap<String, MetricReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_steps: Option<Vec<StepReport>>,
}

impl RecipeReport {
    /// Project a recipe's header fields and the given metric outcomes.
    pub fn new<'a, I>(
        id: RecipeId,
        carbon_source: Option<String>,
        base_pressure: Option<&Measurement>,
        outcomes: I,
    ) -> Self
    where
        I: IntoIterator<Item = (&'a MetricDefinition, MetricOutcome)>,
    {
        Self {
            id,
            carbon_source,
            base_pressure: QuantityReport::project(base_pressure, &PRESSURE),
            metrics: outcomes
                .into_iter()
                .map(|(def, outcome)| {
                    (def.name.to_string(), MetricReport::from_outcome(def, &outcome))
                })
                .collect(),
            preparation_steps: None,
        }
    }

    /// Attach the recipe's steps.
    #[must_use]
    pub fn with_steps(mut self, recipe: &Recipe) -> Self {
        self.preparation_steps =
            Some(recipe.preparation_steps.iter().map(StepReport::from).collect());
        self
    }
}

// =============================================================================
// SUBSTRATE / EXPERIMENT / RAMAN FILE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubstrateReport {
    pub catalyst: Option<String>,
    pub thickness: QuantityReport,
    pub diameter: QuantityReport,
    pub length: QuantityReport,
    pub surface_area: QuantityReport,
}

impl From<&Substrate> for SubstrateReport {
    fn from(substrate: &Substrate) -> Self {
        Self {
            catalyst: substrate.catalyst.clone(),
            thickness: QuantityReport::project(substrate.thickness.as_ref(), &THICKNESS),
            diameter: QuantityReport::project(substrate.diameter.as_ref(), &LENGTH),
            length: QuantityReport::project(substrate.length.as_ref(), &LENGTH),
            surface_area: QuantityReport::project(substrate.surface_area.as_ref(), &AREA),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamanFileReport {
    pub id: RamanFileId,
    pub filename: String,
    pub url: Option<String>,
    pub s3_object_name: Option<String>,
    pub wavelength: QuantityReport,
}

impl From<&RamanFile> for RamanFileReport {
    fn from(file: &RamanFile) -> Self {
        Self {
            id: file.id,
            filename: file.filename.clone(),
            url: file.url.clone(),
            s3_object_name: file.s3_object_name.clone(),
            wavelength: QuantityReport::project(file.wavelength.as_ref(), &WAVELENGTH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub id: ExperimentId,
    pub recipe_id: Option<RecipeId>,
    pub substrate: Option<SubstrateReport>,
    pub raman_files: Vec<RamanFileReport>,
}

impl From<&Experiment> for ExperimentReport {
    fn from(experiment: &Experiment) -> Self {
        Self {
            id: experiment.id,
            recipe_id: experiment.recipe_id,
            substrate: experiment.substrate.as_ref().map(SubstrateReport::from),
            raman_files: experiment.raman_files.iter().map(RamanFileReport::from).collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
