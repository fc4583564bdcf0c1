//! # Derived Metrics
//!
//! Declarative metric definitions and the aggregation primitives shared by
//! both evaluators.
//!
//! A `MetricDefinition` is pure data: a value `Source`, an optional
//! conjunctive `Predicate`, an `Aggregate` operator and a standard unit.
//! Predicates are restricted to equality and non-null tests so that every
//! predicate is expressible both as an in-memory test and as a store-side
//! condition.
//!
//! ## Nullability
//!
//! - `Max`/`Avg`/`Sum` over an empty candidate set are undefined (`None`).
//! - `ExistsNonNull` over an empty or all-null set is `false`.
//! - Null values are excluded from candidate sets, never read as zero,
//!   except inside a `Source::DefaultedSum` where the formula itself
//!   defaults missing components to zero.

mod registry;

pub use registry::*;

use crate::GrdbError;
use crate::fields::{StepField, StepRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// AGGREGATE OPERATOR
// =============================================================================

/// How candidate values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Max,
    Avg,
    Sum,
    /// True iff at least one candidate is present and non-zero.
    ExistsNonNull,
}

impl Aggregate {
    /// SQL name of the operator.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Sum => "SUM",
            Self::ExistsNonNull => "EXISTS",
        }
    }
}

// =============================================================================
// VALUE SOURCE
// =============================================================================

/// Where a metric's per-step candidate value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// One column, converted to its standard unit. Null stays null.
    Field(StepField),
    /// Per-step sum of several columns in standard units, null components
    /// counted as zero. Every step yields a value.
    DefaultedSum(&'static [StepField]),
}

impl Source {
    /// The columns this source reads.
    #[must_use]
    pub fn fields(&self) -> &[StepField] {
        match self {
            Self::Field(field) => std::slice::from_ref(field),
            Self::DefaultedSum(fields) => fields,
        }
    }

    /// Standard unit of the produced value.
    #[must_use]
    pub fn standard_unit(&self) -> Option<&'static str> {
        self.fields().first().map(|f| f.units().standard)
    }

    /// Extract the candidate value of one row, in standard units.
    pub fn extract<R: StepRow + ?Sized>(&self, row: &R) -> Result<Option<f64>, GrdbError> {
        match self {
            Self::Field(field) => row
                .measurement(*field)
                .map(|m| field.to_standard(m))
                .transpose(),
            Self::DefaultedSum(fields) => {
                let mut total = 0.0;
                for field in fields.iter() {
                    if let Some(m) = row.measurement(*field) {
                        total += field.to_standard(m)?;
                    }
                }
                Ok(Some(total))
            }
        }
    }
}

// =============================================================================
// PREDICATE
// =============================================================================

/// One simple test on a step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    /// `name == value`
    NameEquals(&'static str),
    /// `field IS NOT NULL`
    NotNull(StepField),
}

impl Clause {
    /// Evaluate the clause against a row.
    pub fn matches<R: StepRow + ?Sized>(&self, row: &R) -> bool {
        match self {
            Self::NameEquals(name) => row.step_name() == Some(*name),
            Self::NotNull(field) => row.measurement(*field).is_some(),
        }
    }
}

/// A conjunction of clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    clauses: &'static [Clause],
}

impl Predicate {
    /// All of `clauses` must hold.
    #[must_use]
    pub const fn all(clauses: &'static [Clause]) -> Self {
        Self { clauses }
    }

    #[must_use]
    pub fn clauses(&self) -> &'static [Clause] {
        self.clauses
    }

    /// Evaluate the conjunction against a row.
    pub fn matches<R: StepRow + ?Sized>(&self, row: &R) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
    }

    /// Whether any clause tests the step name.
    #[must_use]
    pub fn reads_name(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Clause::NameEquals(_)))
    }
}

// =============================================================================
// METRIC VALUE
// =============================================================================

/// The value of a defined metric. Undefined metrics are `None` at the call
/// site, never a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
}

impl MetricValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Flag(_) => None,
        }
    }

    /// Bit-for-bit equality (distinguishes `0.0` from `-0.0`).
    #[must_use]
    pub fn same_bits(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Flag(a), Self::Flag(b)) => a == b,
            _ => false,
        }
    }
}

/// The outcome of evaluating one metric for one recipe.
pub type MetricOutcome = Result<Option<MetricValue>, GrdbError>;

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Flag(b) => write!(f, "{}", b),
        }
    }
}

// =============================================================================
// METRIC DEFINITION
// =============================================================================

/// A named derived metric over a recipe's ordered steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricDefinition {
    pub name: &'static str,
    /// Human-readable name.
    pub label: &'static str,
    pub source: Source,
    pub filter: Option<Predicate>,
    pub aggregate: Aggregate,
    pub standard_unit: Option<&'static str>,
}

impl MetricDefinition {
    /// Whether a row is eligible under the metric's filter.
    pub fn accepts<R: StepRow + ?Sized>(&self, row: &R) -> bool {
        self.filter.as_ref().is_none_or(|p| p.matches(row))
    }

    /// Every column the metric reads, for filtering or for its value.
    #[must_use]
    pub fn columns(&self) -> BTreeSet<StepField> {
        let mut columns: BTreeSet<StepField> = self.source.fields().iter().copied().collect();
        if let Some(filter) = &self.filter {
            for clause in filter.clauses() {
                if let Clause::NotNull(field) = clause {
                    columns.insert(*field);
                }
            }
        }
        columns
    }

    /// Whether the metric tests the step name.
    #[must_use]
    pub fn reads_name(&self) -> bool {
        self.filter.as_ref().is_some_and(|p| p.reads_name())
    }

    /// Check the definition's internal consistency.
    pub fn validate(&self) -> Result<(), GrdbError> {
        let invalid = |reason: &str| GrdbError::InvalidMetric {
            name: self.name.to_string(),
            reason: reason.to_string(),
        };

        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }

        let fields = self.source.fields();
        if fields.is_empty() {
            return Err(invalid("source reads no field"));
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].contains(field) {
                return Err(invalid("source lists a field twice"));
            }
        }
        let standard = self.source.standard_unit();
        if fields.iter().any(|f| Some(f.units().standard) != standard) {
            return Err(invalid("summed fields have different standard units"));
        }

        match self.aggregate {
            Aggregate::ExistsNonNull if self.standard_unit.is_some() => {
                return Err(invalid("existence metrics carry no unit"));
            }
            Aggregate::ExistsNonNull => {}
            _ if self.standard_unit != standard => {
                return Err(invalid("standard unit does not match the source field"));
            }
            _ => {}
        }

        if let Some(filter) = &self.filter {
            if filter.clauses().is_empty() {
                return Err(invalid("empty filter; use no filter instead"));
            }
            for clause in filter.clauses() {
                if let Clause::NameEquals(name) = clause {
                    if name.is_empty() {
                        return Err(invalid("name clause compares against an empty name"));
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// ACCUMULATOR
// =============================================================================

/// Running state of one aggregate. Both evaluators feed candidates in step
/// order, so floating point results are bit-identical.
#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
    aggregate: Aggregate,
    max: Option<f64>,
    sum: f64,
    count: usize,
    any: bool,
}

impl Accumulator {
    pub(crate) fn new(aggregate: Aggregate) -> Self {
        Self {
            aggregate,
            max: None,
            sum: 0.0,
            count: 0,
            any: false,
        }
    }

    /// Feed one candidate. `None` (null) never contributes.
    pub(crate) fn push(&mut self, value: Option<f64>) {
        let Some(v) = value else {
            return;
        };
        match self.aggregate {
            Aggregate::Max => {
                if self.max.is_none_or(|m| v > m) {
                    self.max = Some(v);
                }
            }
            Aggregate::Avg | Aggregate::Sum => {
                self.sum += v;
                self.count += 1;
            }
            Aggregate::ExistsNonNull => {
                if v != 0.0 {
                    self.any = true;
                }
            }
        }
    }

    /// Whether further candidates can no longer change the result.
    pub(crate) fn is_settled(&self) -> bool {
        self.aggregate == Aggregate::ExistsNonNull && self.any
    }

    pub(crate) fn finish(self) -> Option<MetricValue> {
        match self.aggregate {
            Aggregate::Max => self.max.map(MetricValue::Number),
            Aggregate::Avg if self.count == 0 => None,
            Aggregate::Avg => Some(MetricValue::Number(self.sum / self.count as f64)),
            Aggregate::Sum if self.count == 0 => None,
            Aggregate::Sum => Some(MetricValue::Number(self.sum)),
            Aggregate::ExistsNonNull => Some(MetricValue::Flag(self.any)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Measurement, PreparationStep};

    fn flow(field: StepField, value: f64, unit: &str) -> PreparationStep {
        let mut step = PreparationStep::default();
        *field.slot(&mut step) = Some(Measurement::new(value, unit));
        step
    }

    #[test]
    fn accumulator_empty_sets() {
        assert_eq!(Accumulator::new(Aggregate::Max).finish(), None);
        assert_eq!(Accumulator::new(Aggregate::Avg).finish(), None);
        assert_eq!(Accumulator::new(Aggregate::Sum).finish(), None);
        assert_eq!(
            Accumulator::new(Aggregate::ExistsNonNull).finish(),
            Some(MetricValue::Flag(false))
        );
    }

    #[test]
    fn accumulator_skips_nulls() {
        let mut acc = Accumulator::new(Aggregate::Avg);
        acc.push(Some(5.0));
        acc.push(None);
        assert_eq!(acc.finish(), Some(MetricValue::Number(5.0)));
    }

    #[test]
    fn exists_ignores_zero() {
        let mut acc = Accumulator::new(Aggregate::ExistsNonNull);
        acc.push(Some(0.0));
        assert!(!acc.is_settled());
        assert_eq!(acc.clone().finish(), Some(MetricValue::Flag(false)));
        acc.push(Some(0.5));
        assert!(acc.is_settled());
        assert_eq!(acc.finish(), Some(MetricValue::Flag(true)));
    }

    #[test]
    fn defaulted_sum_converts_and_defaults() {
        let source = Source::DefaultedSum(&[StepField::HydrogenFlowRate, StepField::ArgonFlowRate]);
        let step = flow(StepField::ArgonFlowRate, 0.5, "slm");
        assert_eq!(source.extract(&step).expect("extract"), Some(500.0));
        assert_eq!(
            source.extract(&PreparationStep::default()).expect("extract"),
            Some(0.0)
        );
    }

    #[test]
    fn field_source_keeps_null() {
        let source = Source::Field(StepField::Duration);
        assert_eq!(source.extract(&PreparationStep::default()).expect("extract"), None);
    }

    #[test]
    fn predicate_conjunction() {
        let predicate = Predicate::all(&[
            Clause::NameEquals("Growing"),
            Clause::NotNull(StepField::Duration),
        ]);
        let mut step = flow(StepField::Duration, 3.0, "min");
        assert!(!predicate.matches(&step));
        step.name = Some("Growing".to_string());
        assert!(predicate.matches(&step));
        step.duration = None;
        assert!(!predicate.matches(&step));
    }

    #[test]
    fn validate_rejects_unit_mismatch() {
        let def = MetricDefinition {
            name: "bad",
            label: "Bad",
            source: Source::Field(StepField::Duration),
            filter: None,
            aggregate: Aggregate::Max,
            standard_unit: Some("s"),
        };
        assert!(matches!(def.validate(), Err(GrdbError::InvalidMetric { .. })));
    }

    #[test]
    fn source_reports_standard_unit() {
        assert_eq!(Source::Field(StepField::Duration).standard_unit(), Some("min"));
        assert_eq!(Source::DefaultedSum(&[]).standard_unit(), None);
    }

    #[test]
    fn validate_rejects_mixed_sum() {
        let def = MetricDefinition {
            name: "mixed",
            label: "Mixed",
            source: Source::DefaultedSum(&[StepField::Duration, StepField::ArgonFlowRate]),
            filter: None,
            aggregate: Aggregate::Max,
            standard_unit: Some("min"),
        };
        assert!(def.validate().is_err());
    }

    #[test]
    fn metric_value_bits() {
        assert!(MetricValue::Number(0.0).same_bits(&MetricValue::Number(0.0)));
        assert!(!MetricValue::Number(0.0).same_bits(&MetricValue::Number(-0.0)));
        assert!(!MetricValue::Number(1.0).same_bits(&MetricValue::Flag(true)));
    }

    #[test]
    fn metric_value_json_is_bare() {
        assert_eq!(
            serde_json::to_string(&MetricValue::Number(2.5)).expect("json"),
            "2.5"
        );
        assert_eq!(
            serde_json::to_string(&MetricValue::Flag(true)).expect("json"),
            "true"
        );
    }
}
