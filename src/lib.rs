//! Hive - Rust 智能体编排框架
//!
//! 模块划分：
//! - **agent**: Agent 实体（配置、对话历史、Memory 与工具链接）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、编排器与构建器
//! - **memory**: 对话历史与分层 Memory 实体
//! - **observability**: tracing 初始化
//! - **state**: 检查点与两阶段恢复（存储、事务、编码、恢复器）
//! - **workflow**: 工作流定义、依赖图与 Task 实体

pub mod agent;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod state;
pub mod workflow;

pub use crate::core::{Orchestrator, OrchestratorBuilder};
pub use crate::state::{CheckpointManager, RestoreReport};
