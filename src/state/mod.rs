//! 检查点 / 恢复子系统
//!
//! - [`storage`]：存储抽象与事务（[`FileStorage`]、[`InMemoryStorage`]）
//! - [`bundle`]：序列化单元（StateBundle、EntityReference、EncodedValue）
//! - [`entity`]：实体句柄、发现接口、创建工厂
//! - [`encoder`]：活动实体 → bundle
//! - [`checkpoint`]：检查点的创建、列出、删除、恢复
//! - [`restorer`] / [`context`]：两阶段恢复

pub mod bundle;
pub mod checkpoint;
pub mod context;
pub mod encoder;
pub mod entity;
pub mod file_storage;
pub mod memory_storage;
pub mod restorer;
pub mod storage;

pub use bundle::{EncodedValue, EntityReference, EntityType, StateBundle, STATE_VERSION};
pub use checkpoint::{CheckpointManager, CheckpointManifest, ManifestEntry};
pub use context::{PendingReference, RestorationContext, ResolutionSummary};
pub use encoder::{EntityEncoder, StateEncoder};
pub use entity::{attr, CustomEntity, EntityFactory, EntityHandle, StatefulContainer};
pub use file_storage::{FileStorage, FileTransaction};
pub use memory_storage::{InMemoryStorage, InMemoryTransaction};
pub use restorer::{
    AgentRestorer, EntityRestorer, MemoryRestorer, RestoreManager, RestoreReport, SkippedEntity,
    TaskRestorer, WorkflowRestorer,
};
pub use storage::{StorageProvider, Transaction, TransactionState};
