//! Agent 实体
//!
//! Agent 由 `AgentConfig` 创建，持有交互历史，并通过链接（而非内嵌副本）关联 Memory 与工具实体。
//! 两个 Agent 链接同一个 Memory 时，它们持有的是同一个 `Arc`。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::memory::{ConversationMemory, Memory, Message};
use crate::state::EntityHandle;

/// 创建 Agent 的纯数据配置（检查点中原样保存）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 指定 id（恢复时沿用原 id）；为空则由编排器生成
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            agent_type: agent_type.into(),
            system_prompt: None,
            settings: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

pub struct Agent {
    id: String,
    config: AgentConfig,
    history: RwLock<ConversationMemory>,
    memory: RwLock<Option<Arc<Memory>>>,
    tools: RwLock<Vec<EntityHandle>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, config: AgentConfig, history_turns: usize) -> Self {
        let id = id.into();
        let config = AgentConfig {
            id: Some(id.clone()),
            ..config
        };
        Self {
            id,
            config,
            history: RwLock::new(ConversationMemory::new(history_turns)),
            memory: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn agent_type(&self) -> &str {
        &self.config.agent_type
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn record(&self, message: Message) {
        self.history.write().await.push(message);
    }

    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.messages().to_vec()
    }

    pub async fn restore_history(&self, messages: Vec<Message>) {
        self.history.write().await.replace(messages);
    }

    pub async fn memory(&self) -> Option<Arc<Memory>> {
        self.memory.read().await.clone()
    }

    pub async fn set_memory(&self, memory: Option<Arc<Memory>>) {
        *self.memory.write().await = memory;
    }

    pub async fn tools(&self) -> Vec<EntityHandle> {
        self.tools.read().await.clone()
    }

    /// 追加工具链接；同一实体不会重复添加
    pub async fn add_tool(&self, tool: EntityHandle) {
        let mut tools = self.tools.write().await;
        if !tools.iter().any(|t| t.ptr_eq(&tool)) {
            tools.push(tool);
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("agent_type", &self.config.agent_type)
            .finish_non_exhaustive()
    }
}
