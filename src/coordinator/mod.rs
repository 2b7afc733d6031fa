//! Cluster coordination consumed by the broker query path
//!
//! - `state`: the broker's cached cluster view (`StateManager`)
//! - `repository`: async key/value store abstraction
//! - `storage_state`: storage cluster state model and its persistence

pub mod repository;
pub mod state;
pub mod storage_state;

pub use repository::{MemoryRepository, Repository};
pub use state::{BrokerStateManager, StateManager};
pub use storage_state::{ShardState, ShardStatus, StorageState, StorageStateService};
