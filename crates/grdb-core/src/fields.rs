//! # Step Fields
//!
//! The numeric columns of a preparation step, each bound to exactly one
//! unit table, and the `StepRow` trait through which both evaluators read
//! step data.

use crate::units::{DURATION, FLOW_RATE, PRESSURE, TEMPERATURE, UnitTable};
use crate::{GrdbError, Measurement, PreparationStep};
use serde::{Deserialize, Serialize};

/// A numeric measurement column of `PreparationStep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepField {
    FurnaceTemperature,
    FurnacePressure,
    CarbonSourceFlowRate,
    HydrogenFlowRate,
    HeliumFlowRate,
    ArgonFlowRate,
    Duration,
}

impl StepField {
    /// Number of numeric step columns.
    pub const COUNT: usize = 7;

    /// All columns, in storage-code order.
    pub const ALL: [StepField; Self::COUNT] = [
        Self::FurnaceTemperature,
        Self::FurnacePressure,
        Self::CarbonSourceFlowRate,
        Self::HydrogenFlowRate,
        Self::HeliumFlowRate,
        Self::ArgonFlowRate,
        Self::Duration,
    ];

    /// Column name, as used in JSON and SQL.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FurnaceTemperature => "furnace_temperature",
            Self::FurnacePressure => "furnace_pressure",
            Self::CarbonSourceFlowRate => "carbon_source_flow_rate",
            Self::HydrogenFlowRate => "hydrogen_flow_rate",
            Self::HeliumFlowRate => "helium_flow_rate",
            Self::ArgonFlowRate => "argon_flow_rate",
            Self::Duration => "duration",
        }
    }

    /// Stable storage code. Never reorder.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::FurnaceTemperature => 0,
            Self::FurnacePressure => 1,
            Self::CarbonSourceFlowRate => 2,
            Self::HydrogenFlowRate => 3,
            Self::HeliumFlowRate => 4,
            Self::ArgonFlowRate => 5,
            Self::Duration => 6,
        }
    }

    /// Position in [`StepField::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.code() as usize
    }

    /// Decode a storage code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// The unit table governing this column.
    #[must_use]
    pub const fn units(self) -> &'static UnitTable {
        match self {
            Self::FurnaceTemperature => &TEMPERATURE,
            Self::FurnacePressure => &PRESSURE,
            Self::CarbonSourceFlowRate
            | Self::HydrogenFlowRate
            | Self::HeliumFlowRate
            | Self::ArgonFlowRate => &FLOW_RATE,
            Self::Duration => &DURATION,
        }
    }

    /// Read this column from a step.
    #[must_use]
    pub fn get(self, step: &PreparationStep) -> Option<&Measurement> {
        match self {
            Self::FurnaceTemperature => step.furnace_temperature.as_ref(),
            Self::FurnacePressure => step.furnace_pressure.as_ref(),
            Self::CarbonSourceFlowRate => step.carbon_source_flow_rate.as_ref(),
            Self::HydrogenFlowRate => step.hydrogen_flow_rate.as_ref(),
            Self::HeliumFlowRate => step.helium_flow_rate.as_ref(),
            Self::ArgonFlowRate => step.argon_flow_rate.as_ref(),
            Self::Duration => step.duration.as_ref(),
        }
    }

    /// Mutable access to this column of a step.
    pub fn slot(self, step: &mut PreparationStep) -> &mut Option<Measurement> {
        match self {
            Self::FurnaceTemperature => &mut step.furnace_temperature,
            Self::FurnacePressure => &mut step.furnace_pressure,
            Self::CarbonSourceFlowRate => &mut step.carbon_source_flow_rate,
            Self::HydrogenFlowRate => &mut step.hydrogen_flow_rate,
            Self::HeliumFlowRate => &mut step.helium_flow_rate,
            Self::ArgonFlowRate => &mut step.argon_flow_rate,
            Self::Duration => &mut step.duration,
        }
    }

    /// Convert a measurement of this column to the standard unit.
    ///
    /// An unknown unit is reported against the column name.
    pub fn to_standard(self, measurement: &Measurement) -> Result<f64, GrdbError> {
        measurement
            .to_standard(self.units())
            .map_err(|_| GrdbError::UnknownUnit {
                field: self.name().to_string(),
                unit: measurement.unit.clone(),
            })
    }
}

impl std::fmt::Display for StepField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// ROW ACCESS
// =============================================================================

/// Read access to one step row.
///
/// Implemented by materialized `PreparationStep`s and by the stores' column
/// rows, so predicates and value extraction are written once.
pub trait StepRow {
    /// The step type name, if recorded.
    fn step_name(&self) -> Option<&str>;

    /// A numeric column, if recorded.
    fn measurement(&self, field: StepField) -> Option<&Measurement>;
}

impl<T: StepRow + ?Sized> StepRow for &T {
    fn step_name(&self) -> Option<&str> {
        (**self).step_name()
    }

    fn measurement(&self, field: StepField) -> Option<&Measurement> {
        (**self).measurement(field)
    }
}

impl StepRow for PreparationStep {
    fn step_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn measurement(&self, field: StepField) -> Option<&Measurement> {
        field.get(self)
    }
}

// =============================================================================
// TESTS
// =============================================================================
