//! # In-Memory Evaluator
//!
//! Evaluates a metric over a recipe's already-materialized, ordered steps.
//! Pure, deterministic, no I/O.

use crate::metrics::{Accumulator, MetricDefinition, MetricRegistry, MetricValue};
use crate::{GrdbError, PreparationStep};

/// Evaluates metric definitions directly over loaded steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryEvaluator;

impl InMemoryEvaluator {
    /// Evaluate one metric over `steps` (in recipe order).
    ///
    /// Returns `Ok(None)` when the metric is undefined for these steps, and
    /// `UnknownUnit` if an eligible step carries a unit its field rejects.
    pub fn evaluate(
        metric: &MetricDefinition,
        steps: &[PreparationStep],
    ) -> Result<Option<MetricValue>, GrdbError> {
        let mut acc = Accumulator::new(metric.aggregate);
        for step in steps.iter().filter(|s| metric.accepts(*s)) {
            acc.push(metric.source.extract(step)?);
            if acc.is_settled() {
                break;
            }
        }
        Ok(acc.finish())
    }

    /// Evaluate every registered metric; each entry fails independently.
    pub fn evaluate_all<'r>(
        registry: &'r MetricRegistry,
        steps: &[PreparationStep],
    ) -> Vec<(&'r MetricDefinition, Result<Option<MetricValue>, GrdbError>)> {
        registry
            .iter()
            .map(|def| (def, Self::evaluate(def, steps)))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
