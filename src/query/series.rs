//! Raw series as returned by storage nodes
//!
//! Storage nodes group their data by the query's group-by tag values and ship
//! one `RawSeries` per combination. The combination travels as a single
//! serialized tag-values string (`"a,west"`), which is also the key the final
//! result is ordered by.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::statement::AggregateFunction;

/// Separator between tag values in a serialized tag-values string
pub const TAG_VALUE_DELIMITER: char = ',';

/// Join tag values into the serialized form used on the wire
pub fn concat_tag_values<S: AsRef<str>>(values: &[S]) -> String {
    let mut out = String::new();
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(TAG_VALUE_DELIMITER);
        }
        out.push_str(v.as_ref());
    }
    out
}

/// Split a serialized tag-values string back into ordered values
///
/// An empty string carries no tag values at all.
pub fn split_tag_values(tag_values: &str) -> Vec<&str> {
    if tag_values.is_empty() {
        return Vec::new();
    }
    tag_values.split(TAG_VALUE_DELIMITER).collect()
}

// ============================================================================
// Raw Series
// ============================================================================

/// Samples of one field within a raw series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    /// Field name as stored
    pub name: String,

    /// Aggregation the field was written with, used for bare field selects
    #[serde(default)]
    pub aggregation: Option<AggregateFunction>,

    /// `(timestamp_ms, value)` samples, in any order
    pub samples: Vec<(i64, f64)>,
}

impl RawField {
    /// Create a field with samples
    pub fn new(name: impl Into<String>, samples: Vec<(i64, f64)>) -> Self {
        Self {
            name: name.into(),
            aggregation: None,
            samples,
        }
    }

    /// Declare the field's native aggregation
    pub fn with_aggregation(mut self, func: AggregateFunction) -> Self {
        self.aggregation = Some(func);
        self
    }
}

/// Undecoded time series keyed by its serialized tag values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawSeries {
    tag_values: String,
    fields: Vec<RawField>,
}

impl RawSeries {
    /// Create a series for the given serialized tag values
    pub fn new(tag_values: impl Into<String>) -> Self {
        Self {
            tag_values: tag_values.into(),
            fields: Vec::new(),
        }
    }

    /// Attach a field
    pub fn with_field(mut self, field: RawField) -> Self {
        self.fields.push(field);
        self
    }

    /// Serialized tag values
    pub fn tags(&self) -> &str {
        &self.tag_values
    }

    /// Raw fields carried by this series
    pub fn fields(&self) -> impl Iterator<Item = &RawField> {
        self.fields.iter()
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&RawField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Storage Stats
// ============================================================================

/// Execution stats reported by one storage node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNodeStats {
    /// Node-side execution time in nanoseconds
    pub total_cost: i64,

    /// Bytes sent back to the broker
    pub net_payload: u64,

    /// Shards scanned
    pub shard_count: usize,

    /// Series produced
    pub series_count: usize,
}

/// Stats collected from the storage side, keyed by node indicator
pub type StorageStats = BTreeMap<String, StorageNodeStats>;

// ============================================================================
// Terminal Event
// ============================================================================

/// Error reported by a remote node while executing its task
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    /// Reporting node, when known
    pub node: Option<String>,

    /// Error text exactly as the remote side produced it
    pub message: String,
}

impl RemoteError {
    /// Create a remote error
    pub fn new(node: Option<String>, message: impl Into<String>) -> Self {
        Self {
            node,
            message: message.into(),
        }
    }
}

/// The single terminal payload a dispatched task delivers
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesEvent {
    /// Series merged across all storage nodes
    pub series_list: Vec<RawSeries>,

    /// Storage-side stats, present only when storage measured
    pub stats: Option<StorageStats>,

    /// Remote failure; when set the series list is meaningless
    pub err: Option<RemoteError>,
}

impl TimeSeriesEvent {
    /// Successful event
    pub fn new(series_list: Vec<RawSeries>) -> Self {
        Self {
            series_list,
            stats: None,
            err: None,
        }
    }

    /// Failed event
    pub fn failed(err: RemoteError) -> Self {
        Self {
            series_list: Vec::new(),
            stats: None,
            err: Some(err),
        }
    }

    /// Attach storage-side stats
    pub fn with_stats(mut self, stats: StorageStats) -> Self {
        self.stats = Some(stats);
        self
    }
}
