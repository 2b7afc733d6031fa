//! Storage cluster state and its persistence
//!
//! Each storage cluster periodically publishes which nodes are alive and
//! which node leads every shard of every database. Brokers read this state
//! to decide where queries can run. The state is stored as JSON under a
//! per-cluster key, and every repository call is bounded by a short
//! timeout so a stalled coordinator never blocks a broker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::repository::Repository;
use crate::config::CoordinatorConfig;
use crate::error::StateError;
use crate::types::{ShardId, StorageNode};

/// Deadline applied to each repository call
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Repository key holding the node state of a storage cluster
pub fn storage_cluster_node_state_path(cluster_name: &str) -> String {
    format!("/storage/cluster/{}/state", cluster_name)
}

// ============================================================================
// Storage State Model
// ============================================================================

/// Serving state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// Shard accepts reads
    Online,
    /// Shard is being moved or recovered
    #[default]
    Offline,
}

/// Placement of one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardState {
    /// Shard id
    pub id: ShardId,

    /// Storage node id leading the shard
    pub leader: u32,

    /// Storage node ids holding a replica
    #[serde(default)]
    pub replicas: Vec<u32>,

    /// Serving state
    #[serde(default)]
    pub status: ShardStatus,
}

/// Published state of one storage cluster
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    /// Storage cluster name
    pub name: String,

    /// Alive storage nodes by id
    #[serde(default)]
    pub live_nodes: BTreeMap<u32, StorageNode>,

    /// Shard placement per database
    #[serde(default)]
    pub shard_states: BTreeMap<String, BTreeMap<ShardId, ShardState>>,
}

impl StorageState {
    /// Create an empty state for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Mark a node alive
    pub fn add_live_node(&mut self, node: StorageNode) {
        self.live_nodes.insert(node.id, node);
    }

    /// Record a shard placement
    pub fn set_shard(&mut self, database: &str, shard: ShardState) {
        self.shard_states
            .entry(database.to_string())
            .or_default()
            .insert(shard.id, shard);
    }

    /// Online shards of `database` grouped by their live leader
    pub fn queryable_shards(&self, database: &str) -> BTreeMap<u32, Vec<ShardId>> {
        let mut by_node: BTreeMap<u32, Vec<ShardId>> = BTreeMap::new();
        let Some(shards) = self.shard_states.get(database) else {
            return by_node;
        };
        for shard in shards.values() {
            if shard.status == ShardStatus::Online && self.live_nodes.contains_key(&shard.leader) {
                by_node.entry(shard.leader).or_default().push(shard.id);
            }
        }
        by_node
    }
}

// ============================================================================
// Storage State Service
// ============================================================================

/// Persists storage cluster state in the coordination repository
pub struct StorageStateService {
    repo: Arc<dyn Repository>,
    timeout: Duration,
}

impl StorageStateService {
    /// Create a service with the default per-call timeout
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self::with_timeout(repo, DEFAULT_STATE_TIMEOUT)
    }

    /// Create a service using the coordinator's per-call timeout
    pub fn from_config(repo: Arc<dyn Repository>, config: &CoordinatorConfig) -> Self {
        Self::with_timeout(repo, config.call_timeout())
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a service with a custom per-call timeout
    pub fn with_timeout(repo: Arc<dyn Repository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    /// Save the newest state of a storage cluster
    pub async fn save(&self, cluster_name: &str, state: &StorageState) -> Result<(), StateError> {
        let key = storage_cluster_node_state_path(cluster_name);
        let data = serde_json::to_vec(state)?;
        self.bounded(&key, self.repo.put(&key, data)).await?;
        debug!(cluster = cluster_name, "Saved storage state");
        Ok(())
    }

    /// Load the state of a storage cluster, `StateError::NotExist` if never saved
    pub async fn get(&self, cluster_name: &str) -> Result<StorageState, StateError> {
        let key = storage_cluster_node_state_path(cluster_name);
        let data = self.bounded(&key, self.repo.get(&key)).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn bounded<T, F>(&self, key: &str, call: F) -> Result<T, StateError>
    where
        F: std::future::Future<Output = Result<T, StateError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StateError::Timeout {
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
    }
}
