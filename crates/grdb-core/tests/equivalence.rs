//! # Equivalence Property Tests
//!
//! For synthetically generated steps, the in-memory evaluator and the
//! pushdown path must agree bit for bit on every registered metric, on
//! every backend. Steps are written straight into the store (no ingestion
//! validation) so stored unknown units are exercised too.

use grdb_core::equivalence::outcomes_agree;
use grdb_core::units::ALL_TABLES;
use grdb_core::{
    InMemoryEvaluator, Measurement, MemoryStore, MetricRegistry, NewRecipe, PreparationStep,
    QueryPushdownCompiler, RecipeStore, RedbStore, StepField, StepStore,
};
use proptest::collection::vec;
use proptest::prelude::*;
use tempfile::tempdir;

// =============================================================================
// STRATEGIES
// =============================================================================

fn value() -> impl Strategy<Value = f64> {
    prop_oneof![
        1 => Just(0.0),
        1 => Just(-0.0),
        8 => -1.0e4f64..1.0e4,
    ]
}

fn unit(field: StepField) -> impl Strategy<Value = &'static str> {
    let accepted: Vec<&'static str> = field.units().factors.iter().map(|(u, _)| *u).collect();
    prop_oneof![
        12 => prop::sample::select(accepted),
        1 => Just("bogus"),
    ]
}

fn measurement(field: StepField) -> impl Strategy<Value = Option<Measurement>> {
    prop_oneof![
        1 => Just(None),
        2 => (value(), unit(field)).prop_map(|(v, u)| Some(Measurement::new(v, u))),
    ]
}

fn step() -> impl Strategy<Value = PreparationStep> {
    (
        prop::option::of(prop::sample::select(vec![
            "Growing", "Ramp", "Annealing", "Cooling",
        ])),
        measurement(StepField::FurnaceTemperature),
        measurement(StepField::FurnacePressure),
        measurement(StepField::CarbonSourceFlowRate),
        measurement(StepField::HydrogenFlowRate),
        measurement(StepField::HeliumFlowRate),
        measurement(StepField::ArgonFlowRate),
        measurement(StepField::Duration),
    )
        .prop_map(
            |(name, temperature, pressure, carbon, hydrogen, helium, argon, duration)| {
                PreparationStep {
                    name: name.map(str::to_string),
                    furnace_temperature: temperature,
                    furnace_pressure: pressure,
                    carbon_source: None,
                    carbon_source_flow_rate: carbon,
                    hydrogen_flow_rate: hydrogen,
                    helium_flow_rate: helium,
                    argon_flow_rate: argon,
                    duration,
                }
            },
        )
}

fn recipes() -> impl Strategy<Value = Vec<Vec<PreparationStep>>> {
    vec(vec(step(), 0..10), 1..5)
}

// =============================================================================
// HELPERS
// =============================================================================

fn assert_equivalent<S: RecipeStore>(
    store: &mut S,
    recipes: &[Vec<PreparationStep>],
) -> Result<(), TestCaseError> {
    let registry = MetricRegistry::standard().expect("valid registry");
    for steps in recipes {
        let id = store
            .insert_recipe(&NewRecipe::with_steps(steps.clone()))
            .expect("insert");
        for def in registry.iter() {
            let direct = InMemoryEvaluator::evaluate(def, steps);
            let pushed = QueryPushdownCompiler::compile(def).evaluate_against_store(&*store, id);
            prop_assert!(
                outcomes_agree(&direct, &pushed),
                "{}: in-memory {:?} != pushdown {:?}",
                def.name,
                direct,
                pushed
            );
        }
    }
    Ok(())
}

fn assert_grouped_matches_single<S: StepStore>(store: &S) -> Result<(), TestCaseError> {
    let registry = MetricRegistry::standard().expect("valid registry");
    for def in registry.iter() {
        let expr = QueryPushdownCompiler::compile(def);
        let grouped = store.execute_grouped(&expr).expect("grouped");
        prop_assert_eq!(grouped.len(), store.recipe_ids().expect("ids").len());
        for (id, outcome) in &grouped {
            let single = expr.evaluate_against_store(store, *id);
            prop_assert!(outcomes_agree(outcome, &single), "{} on {:?}", def.name, id);
        }
    }
    Ok(())
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    /// In-memory evaluation equals pushdown on the memory store.
    #[test]
    fn memory_store_equivalence(recipes in recipes()) {
        let mut store = MemoryStore::new();
        assert_equivalent(&mut store, &recipes)?;
        assert_grouped_matches_single(&store)?;
    }

    /// Unit round trip holds for every unit of every table.
    #[test]
    fn unit_round_trip(v in -1.0e6f64..1.0e6) {
        for table in ALL_TABLES {
            for (unit, _) in table.factors {
                let standard = table.to_standard(v, unit).expect("known unit");
                let back = table.from_standard(standard, unit).expect("known unit");
                prop_assert!(
                    (back - v).abs() <= 1e-9 * v.abs().max(1.0),
                    "{} {}",
                    table.quantity,
                    unit
                );
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    /// In-memory evaluation equals pushdown on the redb store.
    #[test]
    fn redb_store_equivalence(recipes in recipes()) {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("prop.redb")).expect("open db");
        assert_equivalent(&mut store, &recipes)?;
        assert_grouped_matches_single(&store)?;
    }

    /// The column layout reassembles exactly the steps that were written.
    #[test]
    fn redb_steps_round_trip(steps in vec(step(), 0..16)) {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("prop.redb")).expect("open db");
        let id = store
            .insert_recipe(&NewRecipe::with_steps(steps.clone()))
            .expect("insert");
        prop_assert_eq!(store.steps_for_recipe(id).expect("load"), steps);
    }
}
