//! 存储抽象：键 → 字节块，支持通过事务原子提交多个键
//!
//! 键是 `/` 分隔的相对路径（如 `checkpoints/<id>/manifest.json`），存储层不理解实体语义。

use async_trait::async_trait;

use crate::core::{StorageError, TransactionError};

/// 持久化键值存储
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// 写入（覆盖语义）；单键写入必须崩溃原子
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// 读取；键不存在时返回 Ok(None)
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// 删除；返回键是否存在过
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// 列出以 prefix 开头的全部键（排序）
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// 开启新事务
    async fn create_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;
}

/// 暂存写入，commit 前对读者不可见；commit / rollback 之后事务关闭
#[async_trait]
pub trait Transaction: Send {
    fn id(&self) -> &str;

    async fn store(&mut self, key: &str, bytes: &[u8]) -> Result<(), TransactionError>;

    async fn commit(&mut self) -> Result<(), TransactionError>;

    async fn rollback(&mut self) -> Result<(), TransactionError>;
}

/// 事务生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
    /// 提交中途失败：暂存区保留以便人工恢复
    Failed,
}

impl TransactionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// 校验并规范化键：拒绝空键、绝对路径、`.`/`..` 段与反斜杠
pub fn validate_key(key: &str) -> Result<&str, StorageError> {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if trimmed
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(trimmed)
}

/// 拼接键路径段
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
