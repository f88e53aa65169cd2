//! 工作流与任务实体：配置、进度、依赖图与构建器（执行引擎由宿主提供）

pub mod builder;
pub mod graph;
pub mod task;
pub mod types;

pub use builder::WorkflowBuilder;
pub use graph::WorkflowGraph;
pub use task::{Task, TaskConfig, TaskProgress};
pub use types::*;
