//! Core data types shared by the broker query tier
//!
//! This module defines the primitives every other module speaks in:
//!
//! # Key Types
//!
//! - **`TimeRange`**: Query window in milliseconds (both ends inclusive)
//! - **`Interval`**: Downsampling step in milliseconds
//! - **`BrokerNode`** / **`StorageNode`**: Process identities used for routing and reporting
//! - **`ReplicaNode`**: A storage node together with the shards it can serve
//! - **`DatabaseConfig`**: Database definition as stored in cluster state
//!
//! # Example
//!
//! ```rust
//! use kuba_broker::types::{Interval, TimeRange};
//!
//! let range = TimeRange::new(0, 60_000).unwrap();
//! let interval = Interval::from_secs(10);
//! assert_eq!(range.align(interval), TimeRange::new(0, 60_000).unwrap());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a shard within a database
pub type ShardId = u32;

/// Storage interval used when a database declares none
pub const DEFAULT_STORAGE_INTERVAL_MS: i64 = 10_000;

// ============================================================================
// Time Range
// ============================================================================

/// Time window for a query
///
/// Timestamps are milliseconds since the Unix epoch. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: i64,

    /// End timestamp in milliseconds (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self, crate::error::Error> {
        if start > end {
            return Err(crate::error::Error::Configuration(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a time range without checking ordering
    pub fn new_unchecked(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp falls within this range (inclusive)
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Duration of the range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range is non-empty in the strict sense (`start < end`)
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Align both ends down to a multiple of `interval`
    ///
    /// If alignment collapses the range, the end is pushed one interval past
    /// the aligned start so the range still covers at least one slot.
    pub fn align(&self, interval: Interval) -> TimeRange {
        let step = interval.as_millis();
        if step <= 0 {
            return *self;
        }
        let start = self.start.div_euclid(step).saturating_mul(step);
        let mut end = self.end.div_euclid(step).saturating_mul(step);
        if end <= start {
            end = start.saturating_add(step);
        }
        TimeRange { start, end }
    }

    /// Number of interval slots the range spans
    pub fn num_of_slots(&self, interval: Interval) -> usize {
        let step = interval.as_millis();
        if step <= 0 || self.end < self.start {
            return 0;
        }
        (self.duration_ms() / step) as usize + 1
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ============================================================================
// Interval
// ============================================================================

/// Downsampling interval in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(i64);

impl Interval {
    /// Zero interval, meaning "let the planner decide"
    pub const ZERO: Interval = Interval(0);

    /// Create an interval from milliseconds
    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    /// Create an interval from seconds
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Interval length in milliseconds
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Whether no interval was requested
    pub fn is_zero(&self) -> bool {
        self.0 <= 0
    }

    /// Timestamp of `slot` relative to `start`
    pub fn timestamp(&self, start: i64, slot: usize) -> i64 {
        let offset = i64::try_from(slot).unwrap_or(i64::MAX).saturating_mul(self.0);
        start.saturating_add(offset)
    }

    /// Slot index of `timestamp` relative to `start`
    pub fn slot(&self, start: i64, timestamp: i64) -> Option<usize> {
        if self.0 <= 0 || timestamp < start {
            return None;
        }
        let offset = timestamp.checked_sub(start)?;
        usize::try_from(offset / self.0).ok()
    }
}

impl From<Duration> for Interval {
    fn from(d: Duration) -> Self {
        Self(d.as_millis() as i64)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ============================================================================
// Node Identities
// ============================================================================

/// A broker process taking part in query coordination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrokerNode {
    /// Host address
    pub host_ip: String,

    /// gRPC port used for task exchange
    pub grpc_port: u16,

    /// HTTP port (reporting only)
    #[serde(default)]
    pub http_port: u16,
}

impl BrokerNode {
    /// Create a broker node identity
    pub fn new(host_ip: impl Into<String>, grpc_port: u16) -> Self {
        Self {
            host_ip: host_ip.into(),
            grpc_port,
            http_port: 0,
        }
    }

    /// Address used to identify this node in plans and stats
    pub fn indicator(&self) -> String {
        format!("{}:{}", self.host_ip, self.grpc_port)
    }
}

/// A storage process holding shard replicas
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageNode {
    /// Storage node id within its cluster
    pub id: u32,

    /// Host address
    pub host_ip: String,

    /// gRPC port used for task exchange
    pub grpc_port: u16,
}

impl StorageNode {
    /// Create a storage node identity
    pub fn new(id: u32, host_ip: impl Into<String>, grpc_port: u16) -> Self {
        Self {
            id,
            host_ip: host_ip.into(),
            grpc_port,
        }
    }

    /// Address used to identify this node in plans and stats
    pub fn indicator(&self) -> String {
        format!("{}:{}", self.host_ip, self.grpc_port)
    }
}

/// A storage node and the shards of one database it can currently serve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaNode {
    /// Node holding the replicas
    pub node: StorageNode,

    /// Queryable shards on that node
    pub shard_ids: Vec<ShardId>,
}

impl ReplicaNode {
    /// Create a replica entry
    pub fn new(node: StorageNode, shard_ids: Vec<ShardId>) -> Self {
        Self { node, shard_ids }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Rollup interval and its retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalOption {
    /// Storage interval in milliseconds
    pub interval: Interval,

    /// Retention in milliseconds (0 = forever)
    #[serde(default)]
    pub retention: i64,
}

/// Storage options of a database
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseOption {
    /// Rollup intervals, finest first once normalized
    #[serde(default)]
    pub intervals: Vec<IntervalOption>,

    /// Whether unknown namespaces are created on write
    #[serde(default)]
    pub auto_create_ns: bool,

    /// Accepted write lag behind now, in milliseconds
    #[serde(default)]
    pub behind: i64,

    /// Accepted write lead ahead of now, in milliseconds
    #[serde(default)]
    pub ahead: i64,
}

/// Database definition kept in cluster state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Database name
    pub name: String,

    /// Storage cluster the database lives on
    #[serde(default)]
    pub storage: String,

    /// Number of shards
    pub num_of_shard: u32,

    /// Replicas per shard
    pub replica_factor: u32,

    /// Storage options
    #[serde(default)]
    pub option: DatabaseOption,

    /// Free-form description
    #[serde(default)]
    pub desc: String,
}

impl DatabaseConfig {
    /// Create a database definition with default options
    pub fn new(name: impl Into<String>, num_of_shard: u32, replica_factor: u32) -> Self {
        Self {
            name: name.into(),
            storage: String::new(),
            num_of_shard,
            replica_factor,
            option: DatabaseOption::default(),
            desc: String::new(),
        }
    }

    /// Add a rollup interval
    pub fn with_interval(mut self, interval: Interval, retention: i64) -> Self {
        self.option.intervals.push(IntervalOption {
            interval,
            retention,
        });
        self
    }

    /// Finest storage interval, or the default when none is configured
    pub fn storage_interval(&self) -> Interval {
        self.option
            .intervals
            .iter()
            .map(|opt| opt.interval)
            .filter(|i| !i.is_zero())
            .min()
            .unwrap_or(Interval::from_millis(DEFAULT_STORAGE_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange::new(1000, 2000).is_ok());
        assert!(TimeRange::new(2000, 1000).is_err());
        assert!(!TimeRange::new_unchecked(5, 5).is_valid());
    }

    #[test]
    fn test_time_range_align() {
        let range = TimeRange::new(12_345, 71_000).unwrap();
        let aligned = range.align(Interval::from_secs(10));
        assert_eq!(aligned, TimeRange::new_unchecked(10_000, 70_000));

        // Collapsed range keeps one slot
        let narrow = TimeRange::new(11_000, 12_000).unwrap();
        assert_eq!(
            narrow.align(Interval::from_secs(10)),
            TimeRange::new_unchecked(10_000, 20_000)
        );
    }

    #[test]
    fn test_interval_slots() {
        let interval = Interval::from_secs(10);
        assert_eq!(interval.slot(0, 25_000), Some(2));
        assert_eq!(interval.slot(10_000, 5_000), None);
        assert_eq!(interval.timestamp(1_000, 3), 31_000);
        assert_eq!(TimeRange::new_unchecked(0, 60_000).num_of_slots(interval), 7);
    }

    #[test]
    fn test_extreme_values_saturate() {
        let interval = Interval::from_secs(10);
        assert_eq!(interval.slot(i64::MIN, i64::MAX), None);
        assert_eq!(interval.timestamp(i64::MAX - 5, 2), i64::MAX);

        let huge = Interval::from_millis(i64::MAX);
        let aligned = TimeRange::new_unchecked(5, 10).align(huge);
        assert_eq!(aligned, TimeRange::new_unchecked(0, i64::MAX));

        let low = TimeRange::new_unchecked(i64::MIN, i64::MIN + 1).align(interval);
        assert!(low.start <= low.end);
        assert_eq!(TimeRange::new_unchecked(i64::MIN, i64::MAX).duration_ms(), i64::MAX);
    }

    #[test]
    fn test_storage_interval() {
        let cfg = DatabaseConfig::new("db", 3, 2);
        assert_eq!(cfg.storage_interval(), Interval::from_secs(10));

        let cfg = cfg
            .with_interval(Interval::from_secs(300), 0)
            .with_interval(Interval::from_secs(30), 0);
        assert_eq!(cfg.storage_interval(), Interval::from_secs(30));
    }

    #[test]
    fn test_node_indicator() {
        assert_eq!(BrokerNode::new("10.0.0.1", 9001).indicator(), "10.0.0.1:9001");
        assert_eq!(StorageNode::new(1, "10.0.0.2", 2891).indicator(), "10.0.0.2:2891");
    }

    #[test]
    fn test_database_config_json() {
        let json = r#"{"name":"db","numOfShard":2,"replicaFactor":1,
            "option":{"intervals":[{"interval":60000,"retention":0}]}}"#;
        let cfg: DatabaseConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.storage_interval(), Interval::from_secs(60));
    }
}
