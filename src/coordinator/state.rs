//! Broker view of cluster state
//!
//! The query path reads cluster metadata through `StateManager`: database
//! definitions, which storage nodes can serve a database's shards, and
//! which brokers are alive. Reads are synchronous and cheap; the view is a
//! cache kept current by watchers on the coordination store.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::storage_state::{StorageState, StorageStateService};
use crate::error::StateError;
use crate::types::{BrokerNode, DatabaseConfig, ReplicaNode};

/// Read-only cluster metadata consumed by the query path
pub trait StateManager: Send + Sync {
    /// Definition of `name`, if it exists
    fn get_database_cfg(&self, name: &str) -> Option<DatabaseConfig>;

    /// Storage nodes able to serve `database`, each with its shard ids
    fn get_queryable_replicas(&self, database: &str) -> Result<Vec<ReplicaNode>, StateError>;

    /// Brokers currently alive
    fn get_live_nodes(&self) -> Vec<BrokerNode>;

    /// This broker
    fn get_current_node(&self) -> BrokerNode;
}

/// In-memory cluster view of a broker
#[derive(Debug)]
pub struct BrokerStateManager {
    current_node: BrokerNode,
    databases: RwLock<HashMap<String, DatabaseConfig>>,
    live_nodes: RwLock<BTreeMap<String, BrokerNode>>,
    storage_states: RwLock<HashMap<String, StorageState>>,
}

impl BrokerStateManager {
    /// Create an empty view for `current_node`
    pub fn new(current_node: BrokerNode) -> Self {
        Self {
            current_node,
            databases: RwLock::new(HashMap::new()),
            live_nodes: RwLock::new(BTreeMap::new()),
            storage_states: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace a database definition
    pub fn on_database_cfg_change(&self, cfg: DatabaseConfig) {
        debug!(database = %cfg.name, "Database config updated");
        self.databases.write().insert(cfg.name.clone(), cfg);
    }

    /// Remove a database definition
    pub fn on_database_delete(&self, name: &str) {
        self.databases.write().remove(name);
    }

    /// Mark a broker alive
    pub fn on_node_startup(&self, node: BrokerNode) {
        self.live_nodes.write().insert(node.indicator(), node);
    }

    /// Mark a broker gone
    pub fn on_node_failure(&self, indicator: &str) {
        self.live_nodes.write().remove(indicator);
    }

    /// Replace the state of one storage cluster
    pub fn on_storage_state_change(&self, state: StorageState) {
        debug!(
            cluster = %state.name,
            live_nodes = state.live_nodes.len(),
            "Storage state updated"
        );
        self.storage_states.write().insert(state.name.clone(), state);
    }

    /// Reload a storage cluster's state from the repository
    pub async fn sync_storage_state(
        &self,
        service: &StorageStateService,
        cluster_name: &str,
    ) -> Result<(), StateError> {
        let state = service.get(cluster_name).await?;
        info!(cluster = cluster_name, "Synced storage state");
        self.on_storage_state_change(state);
        Ok(())
    }
}

impl StateManager for BrokerStateManager {
    fn get_database_cfg(&self, name: &str) -> Option<DatabaseConfig> {
        self.databases.read().get(name).cloned()
    }

    fn get_queryable_replicas(&self, database: &str) -> Result<Vec<ReplicaNode>, StateError> {
        let cluster = self
            .databases
            .read()
            .get(database)
            .map(|cfg| cfg.storage.clone())
            .ok_or_else(|| StateError::NotExist(format!("database {}", database)))?;

        let states = self.storage_states.read();
        let state = states
            .get(&cluster)
            .ok_or_else(|| StateError::NotExist(format!("storage cluster {}", cluster)))?;

        Ok(state
            .queryable_shards(database)
            .into_iter()
            .filter_map(|(node_id, shard_ids)| {
                state
                    .live_nodes
                    .get(&node_id)
                    .map(|node| ReplicaNode::new(node.clone(), shard_ids))
            })
            .collect())
    }

    fn get_live_nodes(&self) -> Vec<BrokerNode> {
        self.live_nodes.read().values().cloned().collect()
    }

    fn get_current_node(&self) -> BrokerNode {
        self.current_node.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::repository::MemoryRepository;
    use crate::coordinator::storage_state::{ShardState, ShardStatus};
    use crate::types::StorageNode;
    use std::sync::Arc;

    fn storage_state() -> StorageState {
        let mut state = StorageState::new("cluster-a");
        state.add_live_node(StorageNode::new(1, "10.0.1.1", 2891));
        state.set_shard(
            "metrics",
            ShardState {
                id: 0,
                leader: 1,
                replicas: vec![1],
                status: ShardStatus::Online,
            },
        );
        state
    }

    fn manager() -> BrokerStateManager {
        let mgr = BrokerStateManager::new(BrokerNode::new("10.0.0.1", 9001));
        let mut cfg = DatabaseConfig::new("metrics", 1, 1);
        cfg.storage = "cluster-a".into();
        mgr.on_database_cfg_change(cfg);
        mgr
    }

    #[test]
    fn test_database_lookup() {
        let mgr = manager();
        assert!(mgr.get_database_cfg("metrics").is_some());
        assert!(mgr.get_database_cfg("other").is_none());
        mgr.on_database_delete("metrics");
        assert!(mgr.get_database_cfg("metrics").is_none());
    }

    #[test]
    fn test_queryable_replicas() {
        let mgr = manager();
        assert!(mgr.get_queryable_replicas("metrics").unwrap_err().is_not_exist());

        mgr.on_storage_state_change(storage_state());
        let replicas = mgr.get_queryable_replicas("metrics").unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].node.indicator(), "10.0.1.1:2891");
        assert_eq!(replicas[0].shard_ids, vec![0]);
    }

    #[test]
    fn test_live_nodes() {
        let mgr = manager();
        mgr.on_node_startup(BrokerNode::new("10.0.0.2", 9001));
        mgr.on_node_startup(BrokerNode::new("10.0.0.1", 9001));
        assert_eq!(mgr.get_live_nodes().len(), 2);
        mgr.on_node_failure("10.0.0.2:9001");
        assert_eq!(mgr.get_live_nodes(), vec![BrokerNode::new("10.0.0.1", 9001)]);
        assert_eq!(mgr.get_current_node().indicator(), "10.0.0.1:9001");
    }

    #[tokio::test]
    async fn test_sync_storage_state() {
        let service = StorageStateService::new(Arc::new(MemoryRepository::new()));
        service.save("cluster-a", &storage_state()).await.unwrap();

        let mgr = manager();
        mgr.sync_storage_state(&service, "cluster-a").await.unwrap();
        assert_eq!(mgr.get_queryable_replicas("metrics").unwrap().len(), 1);
        assert!(mgr.sync_storage_state(&service, "missing").await.is_err());
    }
}
