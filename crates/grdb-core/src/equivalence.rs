//! # Equivalence Verification
//!
//! Runtime check of the contract binding the two evaluators: for every
//! stored recipe and every registered metric,
//! `InMemoryEvaluator::evaluate(m, steps_for_recipe(r))` must equal
//! `QueryPushdownCompiler::compile(m).evaluate_against_store(store, r)`,
//! bit for bit, including which error is returned.

use crate::evaluator::InMemoryEvaluator;
use crate::metrics::{MetricOutcome, MetricRegistry, MetricValue};
use crate::pushdown::QueryPushdownCompiler;
use crate::store::StepStore;
use crate::{GrdbError, RecipeId};
use serde::{Deserialize, Serialize};

/// One side of a comparison, in reportable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub value: Option<MetricValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&MetricOutcome> for OutcomeSummary {
    fn from(outcome: &MetricOutcome) -> Self {
        match outcome {
            Ok(value) => Self {
                value: *value,
                error: None,
            },
            Err(e) => Self {
                value: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// A metric on which the two evaluators disagreed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub recipe: RecipeId,
    pub metric: String,
    pub in_memory: OutcomeSummary,
    pub pushdown: OutcomeSummary,
}

/// Result of a verification run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub recipes_checked: usize,
    pub metrics_checked: usize,
    pub divergences: Vec<Divergence>,
}

impl EquivalenceReport {
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// Whether two outcomes agree bit for bit.
#[must_use]
pub fn outcomes_agree(a: &MetricOutcome, b: &MetricOutcome) -> bool {
    match (a, b) {
        (Ok(None), Ok(None)) => true,
        (Ok(Some(x)), Ok(Some(y))) => x.same_bits(y),
        (Err(x), Err(y)) => x == y,
        _ => false,
    }
}

/// Compare both evaluators on one recipe.
///
/// Store failures on either path abort the check.
pub fn verify_recipe<S: StepStore + ?Sized>(
    store: &S,
    registry: &MetricRegistry,
    recipe: RecipeId,
) -> Result<Vec<Divergence>, GrdbError> {
    let steps = store.steps_for_recipe(recipe)?;
    let mut divergences = Vec::new();

    for def in registry.iter() {
        let in_memory = InMemoryEvaluator::evaluate(def, &steps);
        let pushdown = QueryPushdownCompiler::compile(def).evaluate_against_store(store, recipe);
        if let Err(e @ GrdbError::StoreUnavailable(_)) = &pushdown {
            return Err(e.clone());
        }

        if !outcomes_agree(&in_memory, &pushdown) {
            tracing::warn!(
                recipe = recipe.0,
                metric = def.name,
                "evaluators diverge"
            );
            divergences.push(Divergence {
                recipe,
                metric: def.name.to_string(),
                in_memory: OutcomeSummary::from(&in_memory),
                pushdown: OutcomeSummary::from(&pushdown),
            });
        }
    }
    Ok(divergences)
}

/// Compare both evaluators on every stored recipe.
pub fn verify_store<S: StepStore + ?Sized>(
    store: &S,
    registry: &MetricRegistry,
) -> Result<EquivalenceReport, GrdbError> {
    let mut report = EquivalenceReport::default();
    for recipe in store.recipe_ids()? {
        report.divergences.extend(verify_recipe(store, registry, recipe)?);
        report.recipes_checked += 1;
        report.metrics_checked += registry.len();
    }
    tracing::info!(
        recipes = report.recipes_checked,
        divergences = report.divergences.len(),
        "equivalence verification finished"
    );
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pushdown::AggregateExpression;
    use crate::store::{MemoryStore, RecipeStore};
    use crate::{Measurement, NewRecipe, PreparationStep};
    use std::collections::BTreeMap;

    fn registry() -> &'static MetricRegistry {
        MetricRegistry::standard().expect("valid registry")
    }

    /// A store whose pushdown path answers wrongly on purpose.
    struct SkewedStore(MemoryStore);

    impl StepStore for SkewedStore {
        fn recipe_ids(&self) -> Result<Vec<RecipeId>, GrdbError> {
            self.0.recipe_ids()
        }

        fn steps_for_recipe(&self, recipe: RecipeId) -> Result<Vec<PreparationStep>, GrdbError> {
            self.0.steps_for_recipe(recipe)
        }

        fn execute_aggregate(
            &self,
            expr: &AggregateExpression,
            recipe: RecipeId,
        ) -> Result<Option<MetricValue>, GrdbError> {
            if expr.name() == "maximum_temperature" {
                return Ok(Some(MetricValue::Number(-1.0)));
            }
            self.0.execute_aggregate(expr, recipe)
        }

        fn execute_grouped(
            &self,
            expr: &AggregateExpression,
        ) -> Result<BTreeMap<RecipeId, MetricOutcome>, GrdbError> {
            self.0.execute_grouped(expr)
        }
    }

    fn sample_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut a = PreparationStep::named("Ramp");
        a.furnace_temperature = Some(Measurement::new(700.0, "C"));
        let mut b = PreparationStep::named("Growing");
        b.duration = Some(Measurement::new(15.0, "min"));
        b.argon_flow_rate = Some(Measurement::new(0.2, "slm"));
        store
            .insert_recipe(&NewRecipe::with_steps(vec![a, b]))
            .expect("insert");
        store.insert_recipe(&NewRecipe::default()).expect("insert");
        store
    }

    #[test]
    fn memory_store_is_equivalent() {
        let report = verify_store(&sample_store(), registry()).expect("verify");
        assert!(report.is_equivalent(), "{:?}", report.divergences);
        assert_eq!(report.recipes_checked, 2);
        assert_eq!(report.metrics_checked, 2 * registry().len());
    }

    #[test]
    fn divergence_is_reported() {
        let store = SkewedStore(sample_store());
        let report = verify_store(&store, registry()).expect("verify");
        assert_eq!(report.divergences.len(), 2);
        assert!(report
            .divergences
            .iter()
            .all(|d| d.metric == "maximum_temperature"));
        assert_eq!(
            report.divergences[0].pushdown.value,
            Some(MetricValue::Number(-1.0))
        );
    }

    #[test]
    fn agreement_is_bitwise() {
        assert!(outcomes_agree(&Ok(None), &Ok(None)));
        assert!(!outcomes_agree(
            &Ok(Some(MetricValue::Number(0.0))),
            &Ok(Some(MetricValue::Number(-0.0)))
        ));
        assert!(!outcomes_agree(&Ok(None), &Err(GrdbError::UnknownMetric("x".to_string()))));
    }
}
