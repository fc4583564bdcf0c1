//! # Metric Benchmarks
//!
//! In-memory evaluation versus pushdown over both stores.
//!
//! Run with: `cargo bench -p grdb-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use grdb_core::{
    InMemoryEvaluator, Measurement, MemoryStore, MetricRegistry, NewRecipe, PreparationStep,
    QueryPushdownCompiler, RecipeId, RecipeStore, RedbStore, StepStore,
};
use std::hint::black_box;

const STEP_NAMES: [&str; 4] = ["Ramp", "Annealing", "Growing", "Cooling"];

/// A recipe of `size` steps cycling through the usual stages.
fn create_steps(size: usize) -> Vec<PreparationStep> {
    (0..size)
        .map(|i| {
            let mut step = PreparationStep::named(STEP_NAMES[i % STEP_NAMES.len()]);
            step.furnace_temperature = Some(Measurement::new(700.0 + i as f64, "C"));
            step.furnace_pressure = Some(Measurement::new(500.0, "mTorr"));
            step.hydrogen_flow_rate = Some(Measurement::new(20.0, "sccm"));
            if i % 3 == 0 {
                step.carbon_source_flow_rate = Some(Measurement::new(5.0, "sccm"));
            }
            if i % 5 == 0 {
                step.argon_flow_rate = Some(Measurement::new(0.5, "slm"));
            }
            step.duration = Some(Measurement::new(10.0, "min"));
            step
        })
        .collect()
}

fn fill<S: RecipeStore>(store: &mut S, recipes: usize, steps: usize) -> RecipeId {
    let mut last = RecipeId(0);
    for _ in 0..recipes {
        last = store
            .insert_recipe(&NewRecipe::with_steps(create_steps(steps)))
            .expect("insert");
    }
    last
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_in_memory(c: &mut Criterion) {
    let registry = MetricRegistry::standard().expect("registry");
    let mut group = c.benchmark_group("in_memory_all_metrics");

    for size in [10, 100, 1000].iter() {
        let steps = create_steps(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(InMemoryEvaluator::evaluate_all(registry, &steps)));
        });
    }

    group.finish();
}

fn bench_pushdown_memory(c: &mut Criterion) {
    let registry = MetricRegistry::standard().expect("registry");
    let mut group = c.benchmark_group("pushdown_memory_store");

    for size in [10, 100, 1000].iter() {
        let mut store = MemoryStore::new();
        let id = fill(&mut store, 1, *size);
        let exprs: Vec<_> = registry.iter().map(QueryPushdownCompiler::compile).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for expr in &exprs {
                    let _ = black_box(expr.evaluate_against_store(&store, id));
                }
            });
        });
    }

    group.finish();
}

fn bench_redb(c: &mut Criterion) {
    let registry = MetricRegistry::standard().expect("registry");
    let def = registry.require("maximum_temperature").expect("metric");
    let expr = QueryPushdownCompiler::compile(def);
    let mut group = c.benchmark_group("redb_single_metric");

    for size in [10, 100, 1000].iter() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("bench.redb")).expect("open");
        let id = fill(&mut store, 1, *size);

        group.bench_with_input(BenchmarkId::new("load_then_evaluate", size), size, |b, _| {
            b.iter(|| {
                let steps = store.steps_for_recipe(id).expect("load");
                black_box(InMemoryEvaluator::evaluate(def, &steps))
            });
        });
        group.bench_with_input(BenchmarkId::new("pushdown", size), size, |b, _| {
            b.iter(|| black_box(expr.evaluate_against_store(&store, id)));
        });
    }

    group.finish();
}

fn bench_grouped(c: &mut Criterion) {
    let registry = MetricRegistry::standard().expect("registry");
    let expr = QueryPushdownCompiler::compile(registry.require("max_flow_rate").expect("metric"));
    let mut group = c.benchmark_group("grouped_listing");

    for recipes in [10, 100].iter() {
        let temp = tempfile::tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("bench.redb")).expect("open");
        fill(&mut store, *recipes, 20);

        group.bench_with_input(BenchmarkId::from_parameter(recipes), recipes, |b, _| {
            b.iter(|| black_box(store.execute_grouped(&expr)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_in_memory,
    bench_pushdown_memory,
    bench_redb,
    bench_grouped,
);

criterion_main!(benches);
