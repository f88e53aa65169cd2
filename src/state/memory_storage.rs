//! 内存存储：与 FileStorage 相同的契约，进程退出即丢失
//!
//! 事务在一次写锁内整体提交，因此跨键也是原子的。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{StorageError, TransactionError};
use crate::state::storage::{validate_key, StorageProvider, Transaction, TransactionState};

type Blobs = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

#[derive(Clone, Debug, Default)]
pub struct InMemoryStorage {
    blobs: Blobs,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let key = validate_key(key)?;
        self.blobs.write().await.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = validate_key(key)?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let key = validate_key(key)?;
        Ok(self.blobs.write().await.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn create_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            staged: BTreeMap::new(),
            target: Arc::clone(&self.blobs),
            state: TransactionState::Open,
        }))
    }
}

pub struct InMemoryTransaction {
    id: String,
    staged: BTreeMap<String, Vec<u8>>,
    target: Blobs,
    state: TransactionState,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), TransactionError> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(TransactionError::Closed(self.id.clone()))
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&mut self, key: &str, bytes: &[u8]) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let key = validate_key(key)?;
        self.staged.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransactionError> {
        self.ensure_open()?;
        let mut blobs = self.target.write().await;
        blobs.append(&mut self.staged);
        self.state = TransactionState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TransactionError> {
        self.ensure_open()?;
        self.staged.clear();
        self.state = TransactionState::RolledBack;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_contract() {
        let s = InMemoryStorage::new();
        assert_eq!(s.retrieve("a/b").await.unwrap(), None);
        s.store("a/b", b"1").await.unwrap();
        s.store("a/c", b"2").await.unwrap();
        s.store("z", b"3").await.unwrap();
        assert_eq!(s.list_keys("a/").await.unwrap(), vec!["a/b", "a/c"]);
        assert!(s.delete("a/b").await.unwrap());
        assert!(!s.delete("a/b").await.unwrap());
        assert_eq!(s.len().await, 2);
    }

    #[tokio::test]
    async fn test_in_memory_transaction() {
        let s = InMemoryStorage::new();
        let mut tx = s.create_transaction().await.unwrap();
        tx.store("x", b"1").await.unwrap();
        tx.store("y", b"2").await.unwrap();
        assert!(s.is_empty().await);
        tx.commit().await.unwrap();
        assert_eq!(s.len().await, 2);
        assert!(matches!(tx.store("z", b"3").await, Err(TransactionError::Closed(_))));

        let mut tx = s.create_transaction().await.unwrap();
        tx.store("w", b"4").await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(s.retrieve("w").await.unwrap(), None);
        assert!(matches!(tx.rollback().await, Err(TransactionError::Closed(_))));
    }
}
