//! Field expression evaluation
//!
//! Turns one raw series into per-field downsampled value sequences. Each
//! select item is evaluated independently: raw samples are bucketed into
//! interval slots relative to the query start, folded with the requested
//! aggregation, and arithmetic items are combined slot by slot over the
//! slots both operands produced.
//!
//! An evaluator is owned by a single merge invocation and reused across
//! every series of that query; callers must `reset()` between series.

use std::collections::BTreeMap;

use super::series::{RawField, RawSeries};
use super::statement::{AggregateFunction, Expr, SelectItem};
use crate::types::{Interval, TimeRange};

// ============================================================================
// Field Values
// ============================================================================

/// Downsampled values of one output field, ordered by slot
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldValues {
    values: Vec<(usize, f64)>,
}

impl FieldValues {
    fn from_slots(slots: BTreeMap<usize, f64>) -> Self {
        Self {
            values: slots.into_iter().collect(),
        }
    }

    /// Iterate `(slot, value)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.values.iter().copied()
    }

    /// Number of slots with a value
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no slot has a value
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Evaluator Trait
// ============================================================================

/// Evaluates select items over one raw series at a time
pub trait ExpressionEvaluator: Send {
    /// Evaluate `series`, replacing any previous result
    fn eval(&mut self, series: &RawSeries);

    /// Results of the last `eval`, one entry per select item in select order
    ///
    /// `None` marks an item whose source fields are absent from the series.
    fn result_set(&self) -> &[(String, Option<FieldValues>)];

    /// Drop accumulated state before the next series
    fn reset(&mut self);
}

// ============================================================================
// Slot Accumulator
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct SlotAccumulator {
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
    first: (i64, f64),
    last: (i64, f64),
}

impl SlotAccumulator {
    fn new(timestamp: i64, value: f64) -> Self {
        Self {
            sum: value,
            min: value,
            max: value,
            count: 1,
            first: (timestamp, value),
            last: (timestamp, value),
        }
    }

    fn add(&mut self, timestamp: i64, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
        if timestamp < self.first.0 {
            self.first = (timestamp, value);
        }
        if timestamp >= self.last.0 {
            self.last = (timestamp, value);
        }
    }

    fn finish(&self, func: AggregateFunction) -> f64 {
        match func {
            AggregateFunction::Sum => self.sum,
            AggregateFunction::Min => self.min,
            AggregateFunction::Max => self.max,
            AggregateFunction::Count => self.count as f64,
            AggregateFunction::Avg => self.sum / self.count as f64,
            AggregateFunction::First => self.first.1,
            AggregateFunction::Last => self.last.1,
        }
    }
}

// ============================================================================
// Field Expression
// ============================================================================

/// Default evaluator for the broker's select items
#[derive(Debug, Clone)]
pub struct FieldExpression {
    time_range: TimeRange,
    interval: Interval,
    select_items: Vec<SelectItem>,
    results: Vec<(String, Option<FieldValues>)>,
}

impl FieldExpression {
    /// Create an evaluator for one query
    pub fn new(time_range: TimeRange, interval: Interval, select_items: Vec<SelectItem>) -> Self {
        let capacity = select_items.len();
        Self {
            time_range,
            interval,
            select_items,
            results: Vec::with_capacity(capacity),
        }
    }

    fn aggregate(&self, field: &RawField, func: AggregateFunction) -> BTreeMap<usize, f64> {
        let mut slots: BTreeMap<usize, SlotAccumulator> = BTreeMap::new();
        for &(timestamp, value) in &field.samples {
            if !self.time_range.contains(timestamp) {
                continue;
            }
            let Some(slot) = self.interval.slot(self.time_range.start, timestamp) else {
                continue;
            };
            slots
                .entry(slot)
                .and_modify(|acc| acc.add(timestamp, value))
                .or_insert_with(|| SlotAccumulator::new(timestamp, value));
        }
        slots
            .into_iter()
            .map(|(slot, acc)| (slot, acc.finish(func)))
            .collect()
    }

    fn eval_expr(&self, expr: &Expr, series: &RawSeries) -> Option<BTreeMap<usize, f64>> {
        match expr {
            Expr::Field(name) => {
                let field = series.field(name)?;
                let func = field.aggregation.unwrap_or(AggregateFunction::Sum);
                Some(self.aggregate(field, func))
            }
            Expr::Call { func, field } => {
                let field = series.field(field)?;
                Some(self.aggregate(field, *func))
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval_expr(lhs, series)?;
                let rhs = self.eval_expr(rhs, series)?;
                Some(
                    lhs.into_iter()
                        .filter_map(|(slot, l)| rhs.get(&slot).map(|r| (slot, op.apply(l, *r))))
                        .collect(),
                )
            }
        }
    }
}

impl ExpressionEvaluator for FieldExpression {
    fn eval(&mut self, series: &RawSeries) {
        // Reuse the result buffer across series
        let mut results = std::mem::take(&mut self.results);
        results.clear();
        for item in &self.select_items {
            let values = self
                .eval_expr(&item.expr, series)
                .map(FieldValues::from_slots);
            results.push((item.name(), values));
        }
        self.results = results;
    }

    fn result_set(&self) -> &[(String, Option<FieldValues>)] {
        &self.results
    }

    fn reset(&mut self) {
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::statement::BinaryOp;

    fn expression(items: Vec<SelectItem>) -> FieldExpression {
        FieldExpression::new(
            TimeRange::new(0, 60_000).unwrap(),
            Interval::from_secs(10),
            items,
        )
    }

    #[test]
    fn test_aggregates_per_slot() {
        let series = RawSeries::new("a").with_field(RawField::new(
            "usage",
            vec![(0, 1.0), (5_000, 3.0), (10_000, 10.0), (70_000, 99.0)],
        ));
        let mut expr = expression(vec![
            SelectItem::call(AggregateFunction::Avg, "usage"),
            SelectItem::call(AggregateFunction::Count, "usage"),
            SelectItem::call(AggregateFunction::First, "usage"),
        ]);
        expr.eval(&series);

        let rs = expr.result_set();
        assert_eq!(rs.len(), 3);
        assert_eq!(rs[0].0, "avg(usage)");
        let avg: Vec<_> = rs[0].1.as_ref().unwrap().iter().collect();
        // Sample at 70s is outside the range
        assert_eq!(avg, vec![(0, 2.0), (1, 10.0)]);
        let count: Vec<_> = rs[1].1.as_ref().unwrap().iter().collect();
        assert_eq!(count, vec![(0, 2.0), (1, 1.0)]);
        let first: Vec<_> = rs[2].1.as_ref().unwrap().iter().collect();
        assert_eq!(first, vec![(0, 1.0), (1, 10.0)]);
    }

    #[test]
    fn test_missing_field_yields_none() {
        let series = RawSeries::new("a").with_field(RawField::new("usage", vec![(0, 1.0)]));
        let mut expr = expression(vec![SelectItem::field("idle")]);
        expr.eval(&series);
        assert_eq!(expr.result_set().len(), 1);
        assert!(expr.result_set()[0].1.is_none());
    }

    #[test]
    fn test_bare_field_uses_native_aggregation() {
        let series = RawSeries::new("a").with_field(
            RawField::new("gauge", vec![(0, 1.0), (1_000, 7.0)])
                .with_aggregation(AggregateFunction::Last),
        );
        let mut expr = expression(vec![SelectItem::field("gauge")]);
        expr.eval(&series);
        let values: Vec<_> = expr.result_set()[0].1.as_ref().unwrap().iter().collect();
        assert_eq!(values, vec![(0, 7.0)]);
    }

    #[test]
    fn test_binary_intersects_slots() {
        let series = RawSeries::new("a")
            .with_field(RawField::new("rx", vec![(0, 4.0), (10_000, 0.0)]))
            .with_field(RawField::new("tx", vec![(0, 2.0), (10_000, 0.0), (20_000, 1.0)]));
        let mut expr = expression(vec![SelectItem::binary(
            BinaryOp::Div,
            Expr::Field("rx".into()),
            Expr::Field("tx".into()),
        )]);
        expr.eval(&series);
        let values: Vec<_> = expr.result_set()[0].1.as_ref().unwrap().iter().collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], (0, 2.0));
        assert!(values[1].1.is_nan());
    }

    #[test]
    fn test_reset_clears_results() {
        let series = RawSeries::new("a").with_field(RawField::new("usage", vec![(0, 1.0)]));
        let mut expr = expression(vec![SelectItem::field("usage")]);
        expr.eval(&series);
        assert!(!expr.result_set().is_empty());
        expr.reset();
        assert!(expr.result_set().is_empty());
    }
}
