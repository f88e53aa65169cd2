//! 状态编码器：活动实体 → StateBundle
//!
//! 普通字段原样复制；实体之间的链接变成 `EntityReference`，从不内嵌被链接实体的状态，
//! 因此环形关系（A → M → A）也能被编码；单个值编码失败时降级为 `EncodedValue::Unencodable`。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agent::Agent;
use crate::core::EncodeError;
use crate::memory::Memory;
use crate::state::bundle::{EncodedValue, EntityType, StateBundle};
use crate::state::entity::{CustomEntity, EntityHandle};
use crate::workflow::{Task, Workflow};

/// 自定义实体的编码器，按类型名注册
#[async_trait]
pub trait EntityEncoder: Send + Sync {
    /// 返回 bundle 的 `data` 部分；链接请用 `EntityReference::to_value` 表达
    async fn encode(&self, entity: &dyn CustomEntity) -> Result<Value, EncodeError>;
}

#[derive(Default, Clone)]
pub struct StateEncoder {
    custom: HashMap<String, Arc<dyn EntityEncoder>>,
}

impl StateEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, encoder: Arc<dyn EntityEncoder>) {
        self.custom.insert(type_name.into(), encoder);
    }

    pub fn supports(&self, entity_type: &EntityType) -> bool {
        match entity_type {
            EntityType::Custom(name) => self.custom.contains_key(name),
            _ => true,
        }
    }

    pub async fn encode(&self, entity: &EntityHandle) -> Result<StateBundle, EncodeError> {
        let (data, metadata) = match entity {
            EntityHandle::Agent(agent) => encode_agent(agent).await?,
            EntityHandle::Memory(memory) => encode_memory(memory).await,
            EntityHandle::Workflow(workflow) => encode_workflow(workflow).await?,
            EntityHandle::Task(task) => encode_task(task).await?,
            EntityHandle::Custom(custom) => {
                let encoder = self
                    .custom
                    .get(custom.type_name())
                    .ok_or_else(|| EncodeError::UnsupportedEntityType(custom.type_name().to_string()))?;
                (encoder.encode(custom.as_ref()).await?, Map::new())
            }
        };

        let mut bundle = StateBundle::new(entity.entity_type(), entity.entity_id(), data);
        bundle.metadata = metadata;
        Ok(bundle)
    }
}

fn optional_ref(handle: Option<EntityHandle>) -> Value {
    handle.map_or(Value::Null, |h| h.reference().to_value())
}

async fn encode_agent(agent: &Arc<Agent>) -> Result<(Value, Map<String, Value>), EncodeError> {
    let history: Vec<Value> = agent
        .history()
        .await
        .iter()
        .map(|m| EncodedValue::capture(m).to_value())
        .collect();
    let tools: Vec<Value> = agent
        .tools()
        .await
        .iter()
        .map(|t| t.reference().to_value())
        .collect();

    let data = json!({
        "config": serde_json::to_value(agent.config())?,
        "history": history,
        "memory": optional_ref(agent.memory().await.map(EntityHandle::Memory)),
        "tools": tools,
    });
    let mut metadata = Map::new();
    metadata.insert("name".into(), json!(agent.name()));
    metadata.insert("agent_type".into(), json!(agent.agent_type()));
    Ok((data, metadata))
}

async fn encode_memory(memory: &Arc<Memory>) -> (Value, Map<String, Value>) {
    let mut items = Map::new();
    let mut degraded = 0usize;
    for (key, value) in memory.encoded_items().await {
        if let EncodedValue::Unencodable { type_name, reason } = &value {
            tracing::warn!(
                memory = %memory.id(),
                key = %key,
                type_name = %type_name,
                reason = %reason,
                "memory item cannot be encoded, storing placeholder"
            );
            degraded += 1;
        }
        items.insert(key, value.to_value());
    }

    let data = json!({
        "kind": memory.kind(),
        "items": items,
        "long_term": optional_ref(memory.long_term().await.map(EntityHandle::Memory)),
    });
    let mut metadata = Map::new();
    if degraded > 0 {
        metadata.insert("unencodable_items".into(), json!(degraded));
    }
    (data, metadata)
}

async fn encode_workflow(
    workflow: &Arc<Workflow>,
) -> Result<(Value, Map<String, Value>), EncodeError> {
    let progress = workflow.progress().await;
    let step_agents: Map<String, Value> = workflow
        .step_agents()
        .await
        .into_iter()
        .map(|(step, agent)| (step, EntityHandle::Agent(agent).reference().to_value()))
        .collect();

    let data = json!({
        "config": serde_json::to_value(workflow.config())?,
        "progress": serde_json::to_value(&progress)?,
        "step_agents": step_agents,
    });
    let mut metadata = Map::new();
    metadata.insert("name".into(), json!(workflow.name()));
    metadata.insert("status".into(), serde_json::to_value(progress.status)?);
    Ok((data, metadata))
}

async fn encode_task(task: &Arc<Task>) -> Result<(Value, Map<String, Value>), EncodeError> {
    let progress = task.progress().await;
    let data = json!({
        "config": serde_json::to_value(task.config())?,
        "progress": serde_json::to_value(&progress)?,
        "agent": optional_ref(task.agent().await.map(EntityHandle::Agent)),
    });
    let mut metadata = Map::new();
    metadata.insert("state".into(), serde_json::to_value(progress.state)?);
    Ok((data, metadata))
}
