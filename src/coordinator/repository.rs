//! Key/value coordination repository
//!
//! Cluster metadata lives in an etcd-style store. The broker only needs
//! plain get/put/delete with per-call deadlines, so the store is hidden
//! behind a small async trait. `MemoryRepository` backs tests and
//! single-node deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::StateError;

/// Async key/value store used for cluster state
#[async_trait]
pub trait Repository: Send + Sync {
    /// Read a key, `StateError::NotExist` when absent
    async fn get(&self, key: &str) -> Result<Vec<u8>, StateError>;

    /// Write a key
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StateError>;

    /// Remove a key; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StateError>;
}

/// In-process repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether no key is stored
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StateError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StateError::NotExist(key.to_string()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StateError> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_repository() {
        let repo = MemoryRepository::new();
        assert!(repo.get("/a").await.unwrap_err().is_not_exist());

        repo.put("/a", b"1".to_vec()).await.unwrap();
        assert_eq!(repo.get("/a").await.unwrap(), b"1".to_vec());
        assert_eq!(repo.len(), 1);

        repo.delete("/a").await.unwrap();
        repo.delete("/a").await.unwrap();
        assert!(repo.is_empty());
    }
}
