//! 核心层：错误类型、编排器、构建器

pub mod builder;
pub mod error;
pub mod orchestrator;

pub use builder::OrchestratorBuilder;
pub use error::{
    CheckpointError, EncodeError, OrchestratorError, RestorationError, StorageError,
    TransactionError,
};
pub use orchestrator::Orchestrator;
