//! # Metric Registry
//!
//! The catalog of derived recipe metrics. Pure data, validated once and
//! immutable afterwards, so concurrent readers need no locking.

use super::{Aggregate, Clause, MetricDefinition, Predicate, Source};
use crate::GrdbError;
use crate::fields::StepField;
use crate::primitives::GROWING_STEP;
use crate::units::validate_tables;
use std::sync::OnceLock;

const GAS_FLOWS: &[StepField] = &[
    StepField::HydrogenFlowRate,
    StepField::HeliumFlowRate,
    StepField::ArgonFlowRate,
];

/// The metrics every recipe reports.
pub const STANDARD_METRICS: &[MetricDefinition] = &[
    MetricDefinition {
        name: "maximum_temperature",
        label: "Maximum Temperature",
        source: Source::Field(StepField::FurnaceTemperature),
        filter: None,
        aggregate: Aggregate::Max,
        standard_unit: Some("C"),
    },
    MetricDefinition {
        name: "maximum_pressure",
        label: "Maximum Pressure",
        source: Source::Field(StepField::FurnacePressure),
        filter: None,
        aggregate: Aggregate::Max,
        standard_unit: Some("Torr"),
    },
    MetricDefinition {
        name: "average_carbon_flow_rate",
        label: "Average Carbon Flow Rate",
        source: Source::Field(StepField::CarbonSourceFlowRate),
        filter: Some(Predicate::all(&[Clause::NotNull(StepField::CarbonSourceFlowRate)])),
        aggregate: Aggregate::Avg,
        standard_unit: Some("sccm"),
    },
    MetricDefinition {
        name: "max_flow_rate",
        label: "Maximum Total Flow Rate",
        source: Source::DefaultedSum(GAS_FLOWS),
        filter: None,
        aggregate: Aggregate::Max,
        standard_unit: Some("sccm"),
    },
    MetricDefinition {
        name: "growth_duration",
        label: "Growth Duration",
        source: Source::Field(StepField::Duration),
        filter: Some(Predicate::all(&[
            Clause::NameEquals(GROWING_STEP),
            Clause::NotNull(StepField::Duration),
        ])),
        aggregate: Aggregate::Max,
        standard_unit: Some("min"),
    },
    MetricDefinition {
        name: "carbon_source_flow_rate",
        label: "Carbon Source Flow Rate",
        source: Source::Field(StepField::CarbonSourceFlowRate),
        filter: Some(Predicate::all(&[
            Clause::NameEquals(GROWING_STEP),
            Clause::NotNull(StepField::CarbonSourceFlowRate),
        ])),
        aggregate: Aggregate::Max,
        standard_unit: Some("sccm"),
    },
    MetricDefinition {
        name: "total_duration",
        label: "Total Duration",
        source: Source::Field(StepField::Duration),
        filter: Some(Predicate::all(&[Clause::NotNull(StepField::Duration)])),
        aggregate: Aggregate::Sum,
        standard_unit: Some("min"),
    },
    MetricDefinition {
        name: "uses_helium",
        label: "Uses Helium",
        source: Source::Field(StepField::HeliumFlowRate),
        filter: None,
        aggregate: Aggregate::ExistsNonNull,
        standard_unit: None,
    },
    MetricDefinition {
        name: "uses_argon",
        label: "Uses Argon",
        source: Source::Field(StepField::ArgonFlowRate),
        filter: None,
        aggregate: Aggregate::ExistsNonNull,
        standard_unit: None,
    },
    MetricDefinition {
        name: "uses_hydrogen",
        label: "Uses Hydrogen",
        source: Source::Field(StepField::HydrogenFlowRate),
        filter: None,
        aggregate: Aggregate::ExistsNonNull,
        standard_unit: None,
    },
];

static STANDARD: OnceLock<Result<MetricRegistry, GrdbError>> = OnceLock::new();

/// A validated, immutable set of metric definitions.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    /// Build a registry, validating every definition and name uniqueness.
    pub fn new(definitions: &[MetricDefinition]) -> Result<Self, GrdbError> {
        for (i, def) in definitions.iter().enumerate() {
            def.validate()?;
            if definitions[..i].iter().any(|d| d.name == def.name) {
                return Err(GrdbError::InvalidMetric {
                    name: def.name.to_string(),
                    reason: "registered twice".to_string(),
                });
            }
        }
        Ok(Self {
            definitions: definitions.to_vec(),
        })
    }

    /// The process-wide standard registry.
    ///
    /// Built on first use together with unit table validation; a failure is
    /// returned on every call.
    pub fn standard() -> Result<&'static MetricRegistry, GrdbError> {
        STANDARD
            .get_or_init(|| {
                validate_tables()?;
                MetricRegistry::new(STANDARD_METRICS)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Look up a metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Look up a metric by name, failing with `UnknownMetric`.
    pub fn require(&self, name: &str) -> Result<&MetricDefinition, GrdbError> {
        self.get(name)
            .ok_or_else(|| GrdbError::UnknownMetric(name.to_string()))
    }

    /// Definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
