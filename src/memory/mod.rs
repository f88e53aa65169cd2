//! 记忆层：Agent 交互历史与可检查点的 Memory 实体

pub mod conversation;
pub mod store;

pub use conversation::{ConversationMemory, Message, Role};
pub use store::{Memory, MemoryConfig, MemoryKind, MemoryValue};
