//! # grdb-core
//!
//! The derived-metrics engine of the growth recipe database.
//!
//! A recipe owns an ordered list of preparation steps, each carrying
//! nullable physical measurements. Derived metrics (maxima, averages,
//! existence checks) are computed over those steps, with unit
//! normalization, in one of two ways:
//!
//! - `InMemoryEvaluator`: over steps already loaded into memory
//! - `QueryPushdownCompiler`: compiled into an `AggregateExpression` that
//!   the step store executes over its own rows
//!
//! Both are generated from the same declarative `MetricDefinition`, and
//! their results are contractually identical (see `equivalence`).
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: NO async, NO network dependencies
//! - Read paths never mutate; every store read observes one snapshot
//! - Unit tables and metric definitions are fixed and validated at start-up

// =============================================================================
// MODULES
// =============================================================================

pub mod catalog;
pub mod equivalence;
pub mod evaluator;
pub mod fields;
pub mod formats;
pub mod ingestor;
pub mod metrics;
pub mod primitives;
pub mod pushdown;
pub mod query;
pub mod report;
pub mod storage;
pub mod store;
pub mod timeseries;
pub mod types;
pub mod units;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Experiment, ExperimentHeader, ExperimentId, GrdbError, Measurement, NewExperiment,
    NewRamanFile, NewRecipe, PreparationStep, RamanFile, RamanFileId, Recipe, RecipeHeader,
    RecipeId, Substrate,
};

// =============================================================================
// RE-EXPORTS: Metrics Engine
// =============================================================================

pub use evaluator::InMemoryEvaluator;
pub use fields::{StepField, StepRow};
pub use metrics::{
    Aggregate, Clause, MetricDefinition, MetricOutcome, MetricRegistry, MetricValue, Predicate,
    STANDARD_METRICS, Source,
};
pub use pushdown::{AggregateExpression, ColumnRow, QueryPushdownCompiler};
pub use units::{UnitTable, convert};

// =============================================================================
// RE-EXPORTS: Storage and Catalog
// =============================================================================

pub use catalog::{Catalog, CatalogStats, StorageBackend, Strategy};
pub use equivalence::{Divergence, EquivalenceReport, verify_recipe, verify_store};
pub use ingestor::Ingestor;
pub use query::{Comparison, Condition, RecipeQuery};
pub use report::{
    ExperimentReport, MetricReport, QuantityReport, RamanFileReport, RecipeReport, StepReport,
    SubstrateReport,
};
pub use storage::RedbStore;
pub use store::{MemoryStore, RecipeStore, StepStore};
pub use timeseries::{SpectrumPoint, TimeSeriesParser};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, store_from_bytes, store_to_bytes};
