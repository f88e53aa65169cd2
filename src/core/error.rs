//! 错误类型：存储、事务、编码、恢复、检查点、编排器门面
//!
//! 实体级失败（单个实体编码/恢复、单个引用解析）只记录日志并跳过，不会出现在这里；
//! 这里的错误都是操作级的，会返回给调用方。

use std::path::PathBuf;

use thiserror::Error;

/// 存储层 I/O 错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("I/O error on key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }
}

/// 事务误用（已关闭）或提交/回滚失败
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is closed")]
    Closed(String),

    #[error("Transaction {tx_id} commit failed, staging kept at {}: {source}", .staging.display())]
    CommitFailed {
        tx_id: String,
        staging: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transaction {tx_id} rollback failed: {source}")]
    RollbackFailed {
        tx_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 实体编码错误
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Unsupported entity type: {0}")]
    UnsupportedEntityType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity {entity_type}/{entity_id} cannot be encoded: {reason}")]
    Entity {
        entity_type: String,
        entity_id: String,
        reason: String,
    },
}

/// 恢复错误：清单级失败向上抛出；单实体失败由 RestoreManager 降级为跳过
#[derive(Error, Debug)]
pub enum RestorationError {
    #[error("Checkpoint manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Checkpoint manifest {checkpoint_id} is unreadable: {reason}")]
    ManifestUnreadable {
        checkpoint_id: String,
        reason: String,
    },

    #[error("Invalid bundle data for {entity_type}/{entity_id}: {reason}")]
    InvalidData {
        entity_type: String,
        entity_id: String,
        reason: String,
    },

    #[error("Unsupported state version {version} for {entity_type}")]
    UnsupportedVersion {
        entity_type: String,
        version: String,
    },

    #[error("Unknown attribute '{attribute}' on {entity_type}")]
    UnknownAttribute {
        entity_type: String,
        attribute: String,
    },

    #[error("Attribute '{attribute}' expects {expected}, got {found}")]
    ReferenceTypeMismatch {
        attribute: String,
        expected: String,
        found: String,
    },

    #[error("Entity factory failed: {0}")]
    Factory(#[from] OrchestratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 检查点操作错误：包装创建、删除、恢复过程中的所有下层错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("No checkpoint available")]
    NoCheckpoints,

    #[error("Checkpoint {checkpoint_id} failed: {source}")]
    Create {
        checkpoint_id: String,
        #[source]
        source: TransactionError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Restore failed: {0}")]
    Restoration(#[from] RestorationError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 编排器门面（create_agent / create_memory / ...）的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Workflow error: {0}")]
    Workflow(#[from] crate::workflow::WorkflowError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}
