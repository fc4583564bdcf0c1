//! # Query Module
//!
//! Metric-based recipe filtering.
//!
//! A `RecipeQuery` is a conjunction of `metric <op> value` conditions. The
//! catalog evaluates each condition through grouped pushdown, so filtering
//! never materializes whole recipes. An undefined metric satisfies no
//! condition.

use crate::GrdbError;
use crate::metrics::{Aggregate, MetricRegistry, MetricValue};
use crate::primitives::MAX_QUERY_CONDITIONS;
use serde::{Deserialize, Serialize};

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl Comparison {
    /// Operator symbols, longest first so `>=` wins over `>` when parsing.
    const SYMBOLS: [(&'static str, Comparison); 5] = [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("==", Comparison::Eq),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }

    fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
        }
    }
}

/// One `metric <op> value` test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub op: Comparison,
    pub value: MetricValue,
}

impl Condition {
    #[must_use]
    pub fn new(metric: impl Into<String>, op: Comparison, value: MetricValue) -> Self {
        Self {
            metric: metric.into(),
            op,
            value,
        }
    }

    /// Parse `name<op>value`, e.g. `growth_duration>=10` or `uses_argon==true`.
    pub fn parse(text: &str) -> Result<Self, GrdbError> {
        let invalid = || GrdbError::InvalidInput(format!("invalid condition '{}'", text));

        let (pos, symbol, op) = Comparison::SYMBOLS
            .iter()
            .filter_map(|(symbol, op)| text.find(symbol).map(|pos| (pos, *symbol, *op)))
            .min_by_key(|(pos, symbol, _)| (*pos, std::cmp::Reverse(symbol.len())))
            .ok_or_else(invalid)?;

        let metric = text[..pos].trim();
        let raw = text[pos + symbol.len()..].trim();
        if metric.is_empty() || raw.is_empty() {
            return Err(invalid());
        }

        let value = match raw {
            "true" => MetricValue::Flag(true),
            "false" => MetricValue::Flag(false),
            _ => MetricValue::Number(raw.parse::<f64>().map_err(|_| invalid())?),
        };
        Ok(Self::new(metric, op, value))
    }

    /// Whether a recipe's metric value satisfies the condition.
    #[must_use]
    pub fn matches(&self, actual: Option<&MetricValue>) -> bool {
        match (actual, &self.value) {
            (Some(MetricValue::Number(a)), MetricValue::Number(b)) => self.op.holds(*a, *b),
            (Some(MetricValue::Flag(a)), MetricValue::Flag(b)) => {
                self.op == Comparison::Eq && a == b
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.metric, self.op.symbol(), self.value)
    }
}

/// A conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeQuery {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RecipeQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition.
    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Parse every textual condition.
    pub fn parse_all<S: AsRef<str>>(conditions: &[S]) -> Result<Self, GrdbError> {
        let conditions = conditions
            .iter()
            .map(|c| Condition::parse(c.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { conditions })
    }

    /// Check the query against the registry.
    ///
    /// Flag metrics only compare with `==` against a boolean; numeric
    /// metrics only compare against a number.
    pub fn validate(&self, registry: &MetricRegistry) -> Result<(), GrdbError> {
        if self.conditions.len() > MAX_QUERY_CONDITIONS {
            return Err(GrdbError::InvalidInput(format!(
                "a query holds at most {} conditions",
                MAX_QUERY_CONDITIONS
            )));
        }
        for condition in &self.conditions {
            let def = registry.require(&condition.metric)?;
            let ok = match (def.aggregate, &condition.value) {
                (Aggregate::ExistsNonNull, MetricValue::Flag(_)) => condition.op == Comparison::Eq,
                (Aggregate::ExistsNonNull, MetricValue::Number(_)) => false,
                (_, MetricValue::Number(n)) => n.is_finite(),
                (_, MetricValue::Flag(_)) => false,
            };
            if !ok {
                return Err(GrdbError::InvalidInput(format!(
                    "condition '{}' does not fit metric '{}'",
                    condition, def.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
