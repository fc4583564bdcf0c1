//! # Query Pushdown Compiler
//!
//! Compiles a metric definition into an `AggregateExpression`: a
//! declarative, recipe-correlated aggregate that a store executes over its
//! own rows without materializing whole steps.
//!
//! The compiled expression carries its projection (the columns it reads and
//! whether it reads the step name), so a column-oriented store only scans
//! what the metric needs. The row-level kernel (`fold_rows`) applies the
//! same predicate, unit conversion and aggregate as the in-memory
//! evaluator, in step order, which keeps both paths bit-for-bit equal.

use crate::fields::{StepField, StepRow};
use crate::metrics::{Accumulator, Aggregate, Clause, MetricDefinition, MetricValue, Source};
use crate::store::StepStore;
use crate::{GrdbError, Measurement, RecipeId};

/// Compiles metric definitions into store-executable expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPushdownCompiler;

impl QueryPushdownCompiler {
    /// Compile one metric.
    #[must_use]
    pub fn compile(metric: &MetricDefinition) -> AggregateExpression {
        let columns: Vec<StepField> = metric.columns().into_iter().collect();
        tracing::debug!(
            metric = metric.name,
            columns = columns.len(),
            reads_name = metric.reads_name(),
            "compiled aggregate expression"
        );
        AggregateExpression {
            metric: *metric,
            columns,
            reads_name: metric.reads_name(),
        }
    }
}

/// A compiled, recipe-correlated aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpression {
    metric: MetricDefinition,
    columns: Vec<StepField>,
    reads_name: bool,
}

impl AggregateExpression {
    /// The definition this expression was compiled from.
    #[must_use]
    pub fn metric(&self) -> &MetricDefinition {
        &self.metric
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.metric.name
    }

    /// Columns the store must project, in storage-code order.
    #[must_use]
    pub fn columns(&self) -> &[StepField] {
        &self.columns
    }

    /// Whether the store must project the step name.
    #[must_use]
    pub fn reads_name(&self) -> bool {
        self.reads_name
    }

    /// Evaluate the expression for one recipe inside the store.
    pub fn evaluate_against_store<S: StepStore + ?Sized>(
        &self,
        store: &S,
        recipe: RecipeId,
    ) -> Result<Option<MetricValue>, GrdbError> {
        store.execute_aggregate(self, recipe)
    }

    /// Execution kernel: fold a recipe's projected rows, in step order.
    ///
    /// Stores call this from their scans. A row error aborts the fold.
    pub fn fold_rows<R, I>(&self, rows: I) -> Result<Option<MetricValue>, GrdbError>
    where
        R: StepRow,
        I: IntoIterator<Item = Result<R, GrdbError>>,
    {
        let mut acc = Accumulator::new(self.metric.aggregate);
        for row in rows {
            let row = row?;
            if !self.metric.accepts(&row) {
                continue;
            }
            acc.push(self.metric.source.extract(&row)?);
            if acc.is_settled() {
                break;
            }
        }
        Ok(acc.finish())
    }

    /// Render the expression as a correlated SQL subquery.
    ///
    /// Unit conversion becomes a `CASE` over every accepted unit, with no
    /// `ELSE`. SQL therefore reads an unlisted unit as NULL and drops the
    /// row, while [`Self::evaluate_against_store`] fails with `UnknownUnit`.
    /// The two agree on any data that passed ingestion, which rejects
    /// unlisted units.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let value = render_source(&self.metric.source);
        let mut conditions = vec!["preparation_step.recipe_id = recipe.id".to_string()];
        if let Some(filter) = &self.metric.filter {
            conditions.extend(filter.clauses().iter().map(render_clause));
        }

        let body = match self.metric.aggregate {
            Aggregate::ExistsNonNull => {
                conditions.push(format!("{} IS NOT NULL", value));
                conditions.push(format!("{} <> 0", value));
                format!(
                    "EXISTS (SELECT 1 FROM preparation_step WHERE {})",
                    conditions.join(" AND ")
                )
            }
            op => format!(
                "(SELECT {}({}) FROM preparation_step WHERE {})",
                op.sql_name(),
                value,
                conditions.join(" AND ")
            ),
        };
        format!("{} AS {}", body, self.metric.name)
    }
}

fn render_field(field: StepField) -> String {
    let table = field.units();
    let mut sql = format!(
        "(preparation_step.{} * CASE preparation_step.{}_unit",
        field.name(),
        field.name()
    );
    for (unit, factor) in table.factors {
        sql.push_str(&format!(" WHEN '{}' THEN {:?}", unit, factor));
    }
    sql.push_str(" END)");
    sql
}

fn render_source(source: &Source) -> String {
    match source {
        Source::Field(field) => render_field(*field),
        Source::DefaultedSum(fields) => fields
            .iter()
            .map(|f| format!("COALESCE({}, 0)", render_field(*f)))
            .collect::<Vec<_>>()
            .join(" + "),
    }
}

fn render_clause(clause: &Clause) -> String {
    match clause {
        Clause::NameEquals(name) => {
            format!("preparation_step.name = '{}'", name.replace('\'', "''"))
        }
        Clause::NotNull(field) => format!("preparation_step.{} IS NOT NULL", field.name()),
    }
}

// =============================================================================
// COLUMN ROW
// =============================================================================

/// A step row assembled from projected columns only.
///
/// Columns outside the projection read as null; the compiled expression
/// never asks for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnRow {
    name: Option<String>,
    values: [Option<Measurement>; StepField::COUNT],
}

impl ColumnRow {
    #[must_use]
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            values: Default::default(),
        }
    }

    /// Fill one projected column.
    pub fn set(&mut self, field: StepField, value: Option<Measurement>) {
        self.values[field.index()] = value;
    }
}

impl StepRow for ColumnRow {
    fn step_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn measurement(&self, field: StepField) -> Option<&Measurement> {
        self.values[field.index()].as_ref()
    }
}

// =============================================================================
// TESTS
// =============================================================================
