//! Result Merger - turns raw per-series results into the final result set
//!
//! For every raw series the merger decodes its tag values, applies the
//! grouping policy, runs the expression evaluator and converts the
//! evaluator's `(slot, value)` output into timestamped points. Series are
//! finally ordered by their serialized tag values.
//!
//! # Grouping Policy
//!
//! A series whose decoded tag-value count differs from the number of
//! group-by keys is skipped. This is a deliberate leniency: the query still
//! succeeds and the only visible effect is a smaller series count. Skipped
//! series are counted in the merge summary and the dropped-series metric.
//!
//! Merging never fails a query.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::expression::ExpressionEvaluator;
use super::result::{Points, ResultSet, SeriesResult};
use super::series::{split_tag_values, RawSeries, StorageStats, TimeSeriesEvent};
use super::statement::Query;
use crate::metrics;

/// Decode group-by tags for a serialized tag-values string
///
/// Returns `Ok(None)` when the query has no group-by, `Ok(Some(tags))` when
/// the value count matches the key count, and `Err(count)` with the decoded
/// value count when the series must be skipped.
pub fn group_tags(
    group_by: &[String],
    tag_values: &str,
) -> Result<Option<BTreeMap<String, String>>, usize> {
    if group_by.is_empty() {
        return Ok(None);
    }
    let values = split_tag_values(tag_values);
    if values.len() != group_by.len() {
        return Err(values.len());
    }
    Ok(Some(
        group_by
            .iter()
            .cloned()
            .zip(values.into_iter().map(str::to_string))
            .collect(),
    ))
}

/// What the merge produced besides the result set
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    /// Series skipped by the grouping policy
    pub dropped_series: usize,

    /// Non-finite values removed from point sequences
    pub dropped_points: usize,

    /// Storage-side stats carried by the event
    pub storage_stats: Option<StorageStats>,
}

/// Merges one query's terminal event
///
/// Borrows the evaluator exclusively for the duration of the merge.
pub struct ResultMerger<'a, E: ExpressionEvaluator + ?Sized> {
    query: &'a Query,
    evaluator: &'a mut E,
}

impl<'a, E: ExpressionEvaluator + ?Sized> ResultMerger<'a, E> {
    /// Create a merger for `query`
    pub fn new(query: &'a Query, evaluator: &'a mut E) -> Self {
        Self { query, evaluator }
    }

    /// Merge the event's series into a result set (stats are left empty)
    pub fn merge(mut self, event: TimeSeriesEvent) -> (ResultSet, MergeSummary) {
        let mut result_set = ResultSet::new();
        let mut summary = MergeSummary {
            storage_stats: event.stats,
            ..Default::default()
        };
        let mut fields_seen = BTreeSet::new();

        for raw in &event.series_list {
            let tags = match group_tags(&self.query.group_by, raw.tags()) {
                Ok(tags) => tags,
                Err(count) => {
                    debug!(
                        tag_values = raw.tags(),
                        decoded = count,
                        expected = self.query.group_by.len(),
                        "Skipping series with mismatched group by tag values"
                    );
                    summary.dropped_series += 1;
                    continue;
                },
            };

            let series = result_set.add_series(SeriesResult::new(tags, raw.tags()));
            summary.dropped_points +=
                Self::fill_series(self.query, &mut *self.evaluator, raw, series, &mut fields_seen);
            self.evaluator.reset();
        }

        result_set
            .series
            .sort_by(|a, b| a.tag_values.cmp(&b.tag_values));

        result_set.metric_name = self.query.metric_name.clone();
        result_set.group_by = self.query.group_by.clone();
        result_set.fields = fields_seen.into_iter().collect();
        result_set.start_time = self.query.time_range.start;
        result_set.end_time = self.query.time_range.end;
        result_set.interval = self.query.interval.as_millis();

        if summary.dropped_series > 0 {
            metrics::QUERY_DROPPED_SERIES.inc_by(summary.dropped_series as u64);
        }
        (result_set, summary)
    }

    /// Evaluate one raw series into `series`, returning the non-finite count
    fn fill_series(
        query: &Query,
        evaluator: &mut E,
        raw: &RawSeries,
        series: &mut SeriesResult,
        fields_seen: &mut BTreeSet<String>,
    ) -> usize {
        let mut dropped = 0;
        evaluator.eval(raw);
        for (field_name, values) in evaluator.result_set() {
            let Some(values) = values else {
                continue;
            };
            let mut points = Points::new();
            for (slot, value) in values.iter() {
                if !value.is_finite() {
                    dropped += 1;
                    continue;
                }
                points.add_point(query.interval.timestamp(query.time_range.start, slot), value);
            }
            fields_seen.insert(field_name.clone());
            if !points.is_empty() {
                series.add_field(field_name.clone(), points);
            }
        }
        dropped
    }
}
