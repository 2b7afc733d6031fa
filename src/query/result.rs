//! Query result types and formatters
//!
//! A `ResultSet` is built once by the merger, then handed to the caller
//! and never mutated again. It serializes to the JSON shape the HTTP layer
//! returns and can be rendered as an ASCII table for the CLI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::series::StorageStats;

// ============================================================================
// Points
// ============================================================================

/// Timestamped values of one field, ordered by timestamp
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Points {
    points: BTreeMap<i64, f64>,
}

impl Points {
    /// Empty point sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a point, replacing any value at the same timestamp
    pub fn add_point(&mut self, timestamp: i64, value: f64) {
        self.points.insert(timestamp, value);
    }

    /// Iterate `(timestamp, value)` in timestamp order
    pub fn iter(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.points.iter().map(|(ts, v)| (*ts, *v))
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether there are no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ============================================================================
// Series
// ============================================================================

/// One group-by combination in the result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesResult {
    /// Decoded group-by tags (absent without group-by)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,

    /// Serialized tag values, the ordering key
    #[serde(skip)]
    pub tag_values: String,

    /// Points per output field
    pub fields: BTreeMap<String, Points>,
}

impl SeriesResult {
    /// Create a series entry
    pub fn new(tags: Option<BTreeMap<String, String>>, tag_values: impl Into<String>) -> Self {
        Self {
            tags,
            tag_values: tag_values.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach the points of one field
    pub fn add_field(&mut self, name: impl Into<String>, points: Points) {
        self.fields.insert(name.into(), points);
    }
}

// ============================================================================
// Execution Stats
// ============================================================================

/// Phase timings of one query, in Unix nanoseconds / nanosecond costs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    /// Broker that ran the query
    pub root: String,

    /// Planning start
    pub plan_start: i64,
    /// Planning end
    pub plan_end: i64,
    /// Planning cost
    pub plan_cost: i64,

    /// Wait-for-remote start
    pub wait_start: i64,
    /// Wait-for-remote end
    pub wait_end: i64,
    /// Wait-for-remote cost
    pub wait_cost: i64,

    /// Expression/merge start
    pub expression_start: i64,
    /// Expression/merge end
    pub expression_end: i64,
    /// Expression/merge cost
    pub expression_cost: i64,

    /// Query start
    pub start: i64,
    /// Query end
    pub end: i64,
    /// Wall time of the whole query
    pub total_cost: i64,

    /// Stats reported by storage nodes
    pub storage_nodes: StorageStats,
}

// ============================================================================
// Result Set
// ============================================================================

/// Final answer to a metric query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    /// Queried metric
    pub metric_name: String,

    /// Group-by tag keys
    pub group_by: Vec<String>,

    /// Field names present in at least one series
    pub fields: Vec<String>,

    /// Series ordered by serialized tag values
    pub series: Vec<SeriesResult>,

    /// Effective query start
    pub start_time: i64,

    /// Effective query end
    pub end_time: i64,

    /// Effective interval in milliseconds
    pub interval: i64,

    /// Execution stats, only when storage reported any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ExecutionStats>,
}

impl ResultSet {
    /// Empty result set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a series and return it for further filling
    pub fn add_series(&mut self, series: SeriesResult) -> &mut SeriesResult {
        self.series.push(series);
        let last = self.series.len() - 1;
        &mut self.series[last]
    }

    /// Total number of points across all series and fields
    pub fn point_count(&self) -> usize {
        self.series
            .iter()
            .flat_map(|s| s.fields.values())
            .map(Points::len)
            .sum()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to ASCII table string
    pub fn to_table(&self) -> String {
        if self.series.is_empty() {
            return "No results".to_string();
        }

        let mut output = String::new();
        for s in &self.series {
            output.push_str(&format!("\n{} {}\n", self.metric_name, s.tag_values));
            for (field, points) in &s.fields {
                output.push_str(&format!("  {}\n", field));
                output.push_str("+----------------------+------------------+\n");
                output.push_str("|     timestamp        |      value       |\n");
                output.push_str("+----------------------+------------------+\n");
                for (ts, val) in points.iter().take(100) {
                    output.push_str(&format!("| {:>20} | {:>16.6} |\n", ts, val));
                }
                output.push_str("+----------------------+------------------+\n");
                if points.len() > 100 {
                    output.push_str(&format!("... and {} more points\n", points.len() - 100));
                }
            }
        }

        output.push_str(&format!(
            "\n{} series, {} points\n",
            self.series.len(),
            self.point_count()
        ));
        if let Some(stats) = &self.stats {
            output.push_str(&format!(
                "plan {:.3}ms, wait {:.3}ms, expression {:.3}ms, total {:.3}ms\n",
                stats.plan_cost as f64 / 1e6,
                stats.wait_cost as f64 / 1e6,
                stats.expression_cost as f64 / 1e6,
                stats.total_cost as f64 / 1e6
            ));
        }
        output
    }
}
