//! Broker Plan - physical plan construction for distributed metric queries
//!
//! Binds a normalized statement to the concrete set of nodes that will run
//! it. Planning is pure computation over the cluster snapshot handed in by
//! the caller; it performs no I/O.
//!
//! # Plan Shapes
//!
//! ```text
//! no group-by / single storage node      group-by across storage nodes
//!
//!          Root (this broker)                 Root (this broker)
//!         /    |    \                        /                \
//!     Leaf   Leaf   Leaf               Intermediate      Intermediate
//!                                       (broker A)         (broker B)
//!                                       /      \               |
//!                                    Leaf      Leaf           Leaf
//! ```
//!
//! With group-by, every leaf shuffles its partial groups to all
//! intermediates (hash by tag values), so each intermediate owns a disjoint
//! set of groups and the root only concatenates.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::error::{QueryError, QueryResult};
use super::statement::Query;
use crate::types::{BrokerNode, DatabaseConfig, Interval, ReplicaNode, ShardId};

// ============================================================================
// Physical Plan
// ============================================================================

/// Final receiver of all partial results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// Broker running the query
    pub indicator: String,

    /// Number of direct children the root waits for
    pub num_of_task: usize,
}

/// Broker that merges one partition of the group-by space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intermediate {
    /// Node this intermediate reports to
    pub parent: String,

    /// Broker doing the merge
    pub indicator: String,

    /// Number of leaves assigned to this intermediate
    pub num_of_task: usize,
}

/// Storage node scanning a subset of shards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    /// Node this leaf is accounted to
    pub parent: String,

    /// Storage node running the scan
    pub indicator: String,

    /// Nodes the leaf ships its partial results to
    pub receivers: Vec<String>,

    /// Shards this leaf scans
    pub shard_ids: Vec<ShardId>,
}

/// Concrete per-node execution plan for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalPlan {
    /// Target database
    pub database: String,

    /// Root node
    pub root: Root,

    /// Intermediate merge brokers (empty for direct plans)
    pub intermediates: Vec<Intermediate>,

    /// Storage scans
    pub leaves: Vec<Leaf>,
}

impl PhysicalPlan {
    fn new(root: Root) -> Self {
        Self {
            database: String::new(),
            root,
            intermediates: Vec::new(),
            leaves: Vec::new(),
        }
    }

    /// Indicators of every storage node contacted
    pub fn storage_nodes(&self) -> Vec<&str> {
        self.leaves.iter().map(|l| l.indicator.as_str()).collect()
    }

    /// Whether partial results go through intermediate brokers
    pub fn has_intermediates(&self) -> bool {
        !self.intermediates.is_empty()
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Root({}, db={}, tasks={})",
            self.root.indicator, self.database, self.root.num_of_task
        )?;
        for intermediate in &self.intermediates {
            writeln!(
                f,
                "  Intermediate({}, tasks={})",
                intermediate.indicator, intermediate.num_of_task
            )?;
            for leaf in self.leaves.iter().filter(|l| l.parent == intermediate.indicator) {
                writeln!(f, "    Leaf({}, shards={:?})", leaf.indicator, leaf.shard_ids)?;
            }
        }
        if self.intermediates.is_empty() {
            for leaf in &self.leaves {
                writeln!(f, "  Leaf({}, shards={:?})", leaf.indicator, leaf.shard_ids)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Broker Plan
// ============================================================================

/// Output of planning: the plan plus the statement downstream stages must use
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    /// Physical plan
    pub physical_plan: PhysicalPlan,

    /// Normalized statement
    pub query: Query,
}

/// Builds the physical plan for one metric query
#[derive(Debug)]
pub struct BrokerPlan<'a> {
    query: &'a Query,
    database_cfg: &'a DatabaseConfig,
    storage_nodes: &'a [ReplicaNode],
    current_node: &'a BrokerNode,
    broker_nodes: &'a [BrokerNode],
}

impl<'a> BrokerPlan<'a> {
    /// Capture the planning inputs
    pub fn new(
        query: &'a Query,
        database_cfg: &'a DatabaseConfig,
        storage_nodes: &'a [ReplicaNode],
        current_node: &'a BrokerNode,
        broker_nodes: &'a [BrokerNode],
    ) -> Self {
        Self {
            query,
            database_cfg,
            storage_nodes,
            current_node,
            broker_nodes,
        }
    }

    /// Validate the statement, normalize it and lay out the node tree
    pub fn plan(&self) -> QueryResult<PlannedQuery> {
        self.validate()?;
        let query = self.normalize()?;

        let replicas: Vec<&ReplicaNode> = self
            .storage_nodes
            .iter()
            .filter(|r| !r.shard_ids.is_empty())
            .collect();
        if replicas.is_empty() {
            return Err(QueryError::planning("no storage node can serve shards"));
        }

        let root_indicator = self.current_node.indicator();
        let physical_plan = if replicas.len() == 1 || !query.has_group_by() {
            Self::direct_plan(root_indicator, &replicas)
        } else {
            self.intermediate_plan(root_indicator, &replicas)
        };

        Ok(PlannedQuery {
            physical_plan,
            query,
        })
    }

    fn validate(&self) -> QueryResult<()> {
        if self.query.metric_name.is_empty() {
            return Err(QueryError::planning("metric name is required"));
        }
        if self.query.select_items.is_empty() {
            return Err(QueryError::planning("select list is empty"));
        }
        if !self.query.time_range.is_valid() {
            return Err(QueryError::planning(format!(
                "invalid time range {}",
                self.query.time_range
            )));
        }
        let mut seen = HashSet::new();
        for key in &self.query.group_by {
            if !seen.insert(key.as_str()) {
                return Err(QueryError::planning(format!(
                    "duplicate group by tag key: {}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Snap the interval to the storage interval and align the time range
    fn normalize(&self) -> QueryResult<Query> {
        let storage = self.database_cfg.storage_interval().as_millis();
        let requested = self.query.interval.as_millis();
        let interval = if requested <= storage {
            storage
        } else {
            // round up to a multiple of the storage interval
            requested
                .checked_add(storage - 1)
                .and_then(|n| (n / storage).checked_mul(storage))
                .ok_or_else(|| QueryError::planning("interval out of range"))?
        };

        let mut query = self.query.clone();
        query.interval = Interval::from_millis(interval);
        query.storage_interval = Interval::from_millis(storage);
        query.interval_ratio = interval / storage;
        query.time_range = self.query.time_range.align(query.interval);
        Ok(query)
    }

    fn direct_plan(root_indicator: String, replicas: &[&ReplicaNode]) -> PhysicalPlan {
        let mut plan = PhysicalPlan::new(Root {
            indicator: root_indicator.clone(),
            num_of_task: replicas.len(),
        });
        plan.leaves = replicas
            .iter()
            .map(|r| Leaf {
                parent: root_indicator.clone(),
                indicator: r.node.indicator(),
                receivers: vec![root_indicator.clone()],
                shard_ids: r.shard_ids.clone(),
            })
            .collect();
        plan
    }

    fn intermediate_plan(&self, root_indicator: String, replicas: &[&ReplicaNode]) -> PhysicalPlan {
        // Live brokers plus ourselves, deduplicated and in a stable order
        let mut brokers: Vec<String> = self
            .broker_nodes
            .iter()
            .map(|b| b.indicator())
            .chain(std::iter::once(root_indicator.clone()))
            .collect();
        brokers.sort();
        brokers.dedup();
        brokers.truncate(replicas.len());

        let mut intermediates: Vec<Intermediate> = brokers
            .iter()
            .map(|indicator| Intermediate {
                parent: root_indicator.clone(),
                indicator: indicator.clone(),
                num_of_task: 0,
            })
            .collect();

        let mut leaves = Vec::with_capacity(replicas.len());
        for (idx, replica) in replicas.iter().enumerate() {
            let owner = &mut intermediates[idx % brokers.len()];
            owner.num_of_task += 1;
            leaves.push(Leaf {
                parent: owner.indicator.clone(),
                indicator: replica.node.indicator(),
                receivers: brokers.clone(),
                shard_ids: replica.shard_ids.clone(),
            });
        }
        intermediates.retain(|i| i.num_of_task > 0);

        let mut plan = PhysicalPlan::new(Root {
            indicator: root_indicator,
            num_of_task: intermediates.len(),
        });
        plan.intermediates = intermediates;
        plan.leaves = leaves;
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::statement::{AggregateFunction, QueryBuilder, SelectItem};
    use crate::query::QueryErrorKind;
    use crate::types::{StorageNode, TimeRange};

    fn query(group_by: &[&str]) -> Query {
        let mut builder = QueryBuilder::new("cpu")
            .select(SelectItem::call(AggregateFunction::Avg, "usage"))
            .time_range(TimeRange::new(12_000, 75_000).unwrap())
            .interval(Interval::from_secs(25));
        for key in group_by {
            builder = builder.group_by(*key);
        }
        builder.build().unwrap()
    }

    fn replicas(n: u32) -> Vec<ReplicaNode> {
        (0..n)
            .map(|i| ReplicaNode::new(StorageNode::new(i, format!("10.0.1.{}", i), 2891), vec![i]))
            .collect()
    }

    fn db() -> DatabaseConfig {
        DatabaseConfig::new("metrics", 3, 1).with_interval(Interval::from_secs(10), 0)
    }

    #[test]
    fn test_normalizes_interval_and_range() {
        let q = query(&[]);
        let db = db();
        let nodes = replicas(1);
        let me = BrokerNode::new("10.0.0.1", 9001);
        let planned = BrokerPlan::new(&q, &db, &nodes, &me, &[]).plan().unwrap();

        assert_eq!(planned.query.interval, Interval::from_secs(30));
        assert_eq!(planned.query.storage_interval, Interval::from_secs(10));
        assert_eq!(planned.query.interval_ratio, 3);
        assert_eq!(planned.query.time_range, TimeRange::new_unchecked(0, 60_000));
        // The caller's statement is untouched
        assert_eq!(q.interval, Interval::from_secs(25));
    }

    #[test]
    fn test_small_interval_raised_to_storage_interval() {
        let mut q = query(&[]);
        q.interval = Interval::from_secs(1);
        let db = db();
        let nodes = replicas(1);
        let me = BrokerNode::new("10.0.0.1", 9001);
        let planned = BrokerPlan::new(&q, &db, &nodes, &me, &[]).plan().unwrap();
        assert_eq!(planned.query.interval, Interval::from_secs(10));
        assert_eq!(planned.query.interval_ratio, 1);
    }

    #[test]
    fn test_direct_plan_without_group_by() {
        let q = query(&[]);
        let db = db();
        let nodes = replicas(3);
        let me = BrokerNode::new("10.0.0.1", 9001);
        let brokers = vec![BrokerNode::new("10.0.0.2", 9001)];
        let plan = BrokerPlan::new(&q, &db, &nodes, &me, &brokers)
            .plan()
            .unwrap()
            .physical_plan;

        assert_eq!(plan.root.indicator, "10.0.0.1:9001");
        assert_eq!(plan.root.num_of_task, 3);
        assert!(!plan.has_intermediates());
        assert_eq!(plan.leaves.len(), 3);
        for leaf in &plan.leaves {
            assert_eq!(leaf.receivers, vec!["10.0.0.1:9001".to_string()]);
        }
    }

    #[test]
    fn test_intermediate_plan_with_group_by() {
        let q = query(&["host"]);
        let db = db();
        let nodes = replicas(3);
        let me = BrokerNode::new("10.0.0.1", 9001);
        let brokers = vec![
            BrokerNode::new("10.0.0.2", 9001),
            BrokerNode::new("10.0.0.1", 9001),
        ];
        let plan = BrokerPlan::new(&q, &db, &nodes, &me, &brokers)
            .plan()
            .unwrap()
            .physical_plan;

        assert_eq!(plan.intermediates.len(), 2);
        assert_eq!(plan.root.num_of_task, 2);
        let tasks: usize = plan.intermediates.iter().map(|i| i.num_of_task).sum();
        assert_eq!(tasks, 3);
        assert_eq!(plan.leaves[0].receivers.len(), 2);
        assert_eq!(plan.leaves[0].parent, "10.0.0.1:9001");
        assert_eq!(plan.leaves[1].parent, "10.0.0.2:9001");
    }

    #[test]
    fn test_more_brokers_than_leaves() {
        let q = query(&["host"]);
        let db = db();
        let nodes = replicas(2);
        let me = BrokerNode::new("10.0.0.1", 9001);
        let brokers: Vec<_> = (2..6).map(|i| BrokerNode::new(format!("10.0.0.{}", i), 9001)).collect();
        let plan = BrokerPlan::new(&q, &db, &nodes, &me, &brokers)
            .plan()
            .unwrap()
            .physical_plan;
        assert_eq!(plan.intermediates.len(), 2);
        assert!(plan.intermediates.iter().all(|i| i.num_of_task == 1));
    }

    #[test]
    fn test_planning_errors() {
        let db = db();
        let me = BrokerNode::new("10.0.0.1", 9001);

        let mut empty_select = query(&[]);
        empty_select.select_items.clear();
        let err = BrokerPlan::new(&empty_select, &db, &replicas(1), &me, &[])
            .plan()
            .unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::PlanningError);

        let dup = query(&["host", "host"]);
        assert!(BrokerPlan::new(&dup, &db, &replicas(1), &me, &[]).plan().is_err());

        let mut inverted = query(&[]);
        inverted.time_range = TimeRange::new_unchecked(10, 5);
        assert!(BrokerPlan::new(&inverted, &db, &replicas(1), &me, &[]).plan().is_err());

        let no_shards = vec![ReplicaNode::new(StorageNode::new(1, "10.0.1.1", 2891), vec![])];
        let err = BrokerPlan::new(&query(&[]), &db, &no_shards, &me, &[])
            .plan()
            .unwrap_err();
        assert!(err.message.contains("no storage node"));
    }

    #[test]
    fn test_huge_interval_is_planning_error() {
        let mut q = query(&[]);
        q.interval = Interval::from_millis(i64::MAX);
        let db = db();
        let me = BrokerNode::new("10.0.0.1", 9001);
        let err = BrokerPlan::new(&q, &db, &replicas(1), &me, &[])
            .plan()
            .unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::PlanningError);
        assert!(err.message.contains("interval out of range"));
    }
}
