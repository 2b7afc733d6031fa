//! Metric query statement
//!
//! The statement is produced by the query language front end and is
//! read-only to the broker, apart from the normalized copy the planner
//! hands back. Select items form a small expression tree:
//!
//! ```text
//! avg(usage)            Call { func: Avg, field: "usage" }
//! max(rx) / max(tx)     Binary { op: Div, lhs: Call(..), rhs: Call(..) }
//! idle                  Field("idle")
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_broker::query::statement::{AggregateFunction, QueryBuilder, SelectItem};
//! use kuba_broker::types::{Interval, TimeRange};
//!
//! let stmt = QueryBuilder::new("cpu")
//!     .select(SelectItem::call(AggregateFunction::Avg, "usage"))
//!     .time_range(TimeRange::new(0, 60_000).unwrap())
//!     .interval(Interval::from_secs(10))
//!     .group_by("host")
//!     .build()
//!     .unwrap();
//! assert_eq!(stmt.select_items[0].name(), "avg(usage)");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{QueryError, QueryResult};
use crate::types::{Interval, TimeRange};

// ============================================================================
// Query Statement
// ============================================================================

/// A parsed metric query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Metric namespace
    #[serde(default)]
    pub namespace: String,

    /// Metric name
    pub metric_name: String,

    /// Fields and expressions to return
    pub select_items: Vec<SelectItem>,

    /// Query window
    pub time_range: TimeRange,

    /// Downsampling interval (zero lets the planner pick)
    pub interval: Interval,

    /// Ratio of `interval` to the storage interval, filled in by the planner
    #[serde(default)]
    pub interval_ratio: i64,

    /// Storage interval the data is read at, filled in by the planner
    #[serde(default)]
    pub storage_interval: Interval,

    /// Group-by tag keys, in output order
    #[serde(default)]
    pub group_by: Vec<String>,

    /// Maximum number of series returned by storage (0 = unlimited)
    #[serde(default)]
    pub limit: usize,

    /// Whether storage should attach execution stats
    #[serde(default)]
    pub explain: bool,
}

impl Query {
    /// Whether the statement groups by tag keys
    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Output field names, in select order
    pub fn field_names(&self) -> Vec<String> {
        self.select_items.iter().map(|item| item.name()).collect()
    }
}

// ============================================================================
// Select Items
// ============================================================================

/// Per-slot aggregation applied to a raw field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Number of samples
    Count,
    /// Arithmetic mean
    Avg,
    /// Earliest sample in the slot
    First,
    /// Latest sample in the slot
    Last,
}

impl AggregateFunction {
    /// Function name as written in queries
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Count => "count",
            AggregateFunction::Avg => "avg",
            AggregateFunction::First => "first",
            AggregateFunction::Last => "last",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic between two expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Apply the operator
    pub fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Expression evaluated per series and per slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Raw field, folded with the field's own aggregation
    Field(String),

    /// Aggregation over a raw field
    Call {
        /// Aggregation to apply
        func: AggregateFunction,
        /// Raw field name
        field: String,
    },

    /// Slot-wise arithmetic
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(name) => f.write_str(name),
            Expr::Call { func, field } => write!(f, "{}({})", func, field),
            Expr::Binary { op, lhs, rhs } => write!(f, "{}{}{}", lhs, op.symbol(), rhs),
        }
    }
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    /// Expression to evaluate
    pub expr: Expr,

    /// Output name override
    #[serde(default)]
    pub alias: Option<String>,
}

impl SelectItem {
    /// Select a raw field
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            expr: Expr::Field(name.into()),
            alias: None,
        }
    }

    /// Select an aggregation over a raw field
    pub fn call(func: AggregateFunction, field: impl Into<String>) -> Self {
        Self {
            expr: Expr::Call {
                func,
                field: field.into(),
            },
            alias: None,
        }
    }

    /// Select slot-wise arithmetic between two expressions
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self {
            expr: Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            alias: None,
        }
    }

    /// Rename the output field
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output field name
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.to_string(),
        }
    }
}

// ============================================================================
// Query Builder
// ============================================================================

/// Fluent builder for [`Query`]
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Start a query against `metric_name`
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            query: Query {
                namespace: String::new(),
                metric_name: metric_name.into(),
                select_items: Vec::new(),
                time_range: TimeRange::default(),
                interval: Interval::ZERO,
                interval_ratio: 0,
                storage_interval: Interval::ZERO,
                group_by: Vec::new(),
                limit: 0,
                explain: false,
            },
        }
    }

    /// Set the namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.query.namespace = namespace.into();
        self
    }

    /// Add a select item
    pub fn select(mut self, item: SelectItem) -> Self {
        self.query.select_items.push(item);
        self
    }

    /// Set the query window
    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.query.time_range = range;
        self
    }

    /// Set the downsampling interval
    pub fn interval(mut self, interval: Interval) -> Self {
        self.query.interval = interval;
        self
    }

    /// Add a group-by tag key
    pub fn group_by(mut self, key: impl Into<String>) -> Self {
        self.query.group_by.push(key.into());
        self
    }

    /// Limit the number of series
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    /// Ask storage nodes for execution stats
    pub fn explain(mut self) -> Self {
        self.query.explain = true;
        self
    }

    /// Finish the statement
    pub fn build(self) -> QueryResult<Query> {
        if self.query.metric_name.is_empty() {
            return Err(QueryError::planning("metric name is required"));
        }
        Ok(self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_item_names() {
        assert_eq!(SelectItem::field("idle").name(), "idle");
        assert_eq!(
            SelectItem::call(AggregateFunction::Max, "rx").name(),
            "max(rx)"
        );
        let ratio = SelectItem::binary(
            BinaryOp::Div,
            Expr::Call {
                func: AggregateFunction::Sum,
                field: "rx".into(),
            },
            Expr::Field("tx".into()),
        );
        assert_eq!(ratio.name(), "sum(rx)/tx");
        assert_eq!(ratio.with_alias("ratio").name(), "ratio");
    }

    #[test]
    fn test_builder_requires_metric() {
        assert!(QueryBuilder::new("").build().is_err());
        let q = QueryBuilder::new("cpu").group_by("host").build().unwrap();
        assert!(q.has_group_by());
        assert!(q.interval.is_zero());
    }

    #[test]
    fn test_binary_op_division_by_zero() {
        assert!(BinaryOp::Div.apply(0.0, 0.0).is_nan());
        assert!(BinaryOp::Div.apply(1.0, 0.0).is_infinite());
        assert_eq!(BinaryOp::Sub.apply(5.0, 3.0), 2.0);
    }
}
