//! 编排器：宿主实例
//!
//! 持有全部活动实体（Agent / Memory / Workflow / Task / 自定义实体），对外提供创建门面与检查点操作。
//! 它同时实现 `StatefulContainer`（供检查点发现实体）与 `EntityFactory`（供恢复器重建实体）。

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::agent::{Agent, AgentConfig};
use crate::config::AppConfig;
use crate::core::builder::OrchestratorBuilder;
use crate::core::{CheckpointError, OrchestratorError};
use crate::memory::{Memory, MemoryConfig};
use crate::state::bundle::{is_key_segment, EntityType};
use crate::state::{
    CheckpointManager, CheckpointManifest, CustomEntity, EntityFactory, EntityHandle,
    RestoreReport, StatefulContainer,
};
use crate::workflow::{Task, TaskConfig, Workflow, WorkflowConfig};

/// 按创建顺序保存的实体；同 id 再次登记时原地替换
#[derive(Default)]
struct Entities {
    agents: Vec<Arc<Agent>>,
    memories: Vec<Arc<Memory>>,
    workflows: Vec<Arc<Workflow>>,
    tasks: Vec<Arc<Task>>,
    custom: Vec<Arc<dyn CustomEntity>>,
}

fn upsert<T: ?Sized>(list: &mut Vec<Arc<T>>, item: Arc<T>, id_of: impl Fn(&T) -> &str) {
    let id = id_of(item.as_ref()).to_string();
    match list.iter().position(|e| id_of(e.as_ref()) == id) {
        Some(index) => {
            tracing::debug!(entity_id = %id, "replacing live entity with the same id");
            list[index] = item;
        }
        None => list.push(item),
    }
}

fn assign_id(requested: Option<String>) -> Result<String, OrchestratorError> {
    match requested {
        Some(id) if is_key_segment(&id) => Ok(id),
        Some(id) => Err(OrchestratorError::InvalidConfig(format!(
            "entity id '{id}' must be a non-empty name without path separators"
        ))),
        None => Ok(uuid::Uuid::new_v4().to_string()),
    }
}

pub struct Orchestrator {
    config: AppConfig,
    checkpoints: CheckpointManager,
    entities: RwLock<Entities>,
}

impl Orchestrator {
    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub(crate) fn from_parts(config: AppConfig, checkpoints: CheckpointManager) -> Self {
        Self {
            config,
            checkpoints,
            entities: RwLock::new(Entities::default()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    // ---- 创建门面 ----

    pub async fn create_agent(&self, config: AgentConfig) -> Result<Arc<Agent>, OrchestratorError> {
        let id = assign_id(config.id.clone())?;
        let agent = Arc::new(Agent::new(id, config, self.config.agents.history_turns));
        tracing::debug!(agent = %agent.id(), name = %agent.name(), "agent created");
        upsert(&mut self.entities.write().await.agents, Arc::clone(&agent), Agent::id);
        Ok(agent)
    }

    pub async fn create_memory(&self, config: MemoryConfig) -> Result<Arc<Memory>, OrchestratorError> {
        let id = assign_id(config.id)?;
        let memory = Arc::new(Memory::new(id, config.kind));
        tracing::debug!(memory = %memory.id(), kind = %memory.kind(), "memory created");
        upsert(&mut self.entities.write().await.memories, Arc::clone(&memory), Memory::id);
        Ok(memory)
    }

    pub async fn create_workflow(
        &self,
        config: WorkflowConfig,
    ) -> Result<Arc<Workflow>, OrchestratorError> {
        let id = assign_id(config.id.clone())?;
        let workflow = Arc::new(Workflow::new(id, config)?);
        tracing::debug!(workflow = %workflow.id(), name = %workflow.name(), "workflow created");
        upsert(
            &mut self.entities.write().await.workflows,
            Arc::clone(&workflow),
            Workflow::id,
        );
        Ok(workflow)
    }

    pub async fn create_task(&self, config: TaskConfig) -> Result<Arc<Task>, OrchestratorError> {
        let id = assign_id(config.id.clone())?;
        let task = Arc::new(Task::new(id, config));
        tracing::debug!(task = %task.id(), "task created");
        upsert(&mut self.entities.write().await.tasks, Arc::clone(&task), Task::id);
        Ok(task)
    }

    /// 登记宿主自定义实体；其类型需在构建时注册编码器与恢复器才会进入检查点
    pub async fn register_custom(&self, entity: Arc<dyn CustomEntity>) -> Result<(), OrchestratorError> {
        if !is_key_segment(entity.type_name()) || !is_key_segment(entity.entity_id()) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "custom entity {}/{} is not addressable",
                entity.type_name(),
                entity.entity_id()
            )));
        }
        if !self
            .checkpoints
            .encoder()
            .supports(&EntityType::from(entity.type_name()))
        {
            tracing::warn!(
                entity_type = %entity.type_name(),
                "no encoder registered for custom type, it will be skipped by checkpoints"
            );
        }
        upsert(&mut self.entities.write().await.custom, entity, |e| e.entity_id());
        Ok(())
    }

    // ---- 查询 ----

    pub async fn agents(&self) -> Vec<Arc<Agent>> {
        self.entities.read().await.agents.clone()
    }

    pub async fn memories(&self) -> Vec<Arc<Memory>> {
        self.entities.read().await.memories.clone()
    }

    pub async fn workflows(&self) -> Vec<Arc<Workflow>> {
        self.entities.read().await.workflows.clone()
    }

    pub async fn tasks(&self) -> Vec<Arc<Task>> {
        self.entities.read().await.tasks.clone()
    }

    pub async fn custom_entities(&self) -> Vec<Arc<dyn CustomEntity>> {
        self.entities.read().await.custom.clone()
    }

    pub async fn agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.entities.read().await.agents.iter().find(|a| a.id() == id).cloned()
    }

    pub async fn memory(&self, id: &str) -> Option<Arc<Memory>> {
        self.entities.read().await.memories.iter().find(|m| m.id() == id).cloned()
    }

    pub async fn workflow(&self, id: &str) -> Option<Arc<Workflow>> {
        self.entities.read().await.workflows.iter().find(|w| w.id() == id).cloned()
    }

    pub async fn task(&self, id: &str) -> Option<Arc<Task>> {
        self.entities.read().await.tasks.iter().find(|t| t.id() == id).cloned()
    }

    // ---- 检查点 ----

    pub async fn create_checkpoint(
        &self,
        name: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, CheckpointError> {
        self.checkpoints.create_checkpoint(self, name, metadata).await
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointManifest>, CheckpointError> {
        self.checkpoints.list_checkpoints().await
    }

    /// 按 id 或名字恢复；恢复出的实体登记到本实例（同 id 的现有实体被替换）
    pub async fn resume_from_checkpoint(
        &self,
        id_or_name: &str,
    ) -> Result<RestoreReport, CheckpointError> {
        let manifest = self
            .checkpoints
            .resolve_checkpoint(id_or_name)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id_or_name.to_string()))?;
        self.checkpoints
            .restore_checkpoint(self, &manifest.checkpoint_id)
            .await
    }

    pub async fn resume_latest_checkpoint(&self) -> Result<RestoreReport, CheckpointError> {
        let manifest = self
            .checkpoints
            .get_latest_checkpoint()
            .await?
            .ok_or(CheckpointError::NoCheckpoints)?;
        self.checkpoints
            .restore_checkpoint(self, &manifest.checkpoint_id)
            .await
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, CheckpointError> {
        self.checkpoints.delete_checkpoint(checkpoint_id).await
    }
}

#[async_trait]
impl StatefulContainer for Orchestrator {
    /// 登记的实体加上经由链接可达的实体（例如只挂在 Agent 上、未经门面创建的 Memory），按类型和 id 去重
    async fn list_entities(&self) -> Vec<EntityHandle> {
        let roots: Vec<EntityHandle> = {
            let entities = self.entities.read().await;
            entities
                .agents
                .iter()
                .cloned()
                .map(EntityHandle::Agent)
                .chain(entities.memories.iter().cloned().map(EntityHandle::Memory))
                .chain(entities.workflows.iter().cloned().map(EntityHandle::Workflow))
                .chain(entities.tasks.iter().cloned().map(EntityHandle::Task))
                .chain(entities.custom.iter().cloned().map(EntityHandle::Custom))
                .collect()
        };

        let mut seen = HashSet::new();
        let mut discovered = Vec::with_capacity(roots.len());
        let mut queue: VecDeque<EntityHandle> = roots.into();
        while let Some(handle) = queue.pop_front() {
            if !seen.insert((handle.entity_type(), handle.entity_id().to_string())) {
                continue;
            }
            queue.extend(handle.links().await);
            discovered.push(handle);
        }
        discovered
    }
}

#[async_trait]
impl EntityFactory for Orchestrator {
    async fn create_agent(&self, config: AgentConfig) -> Result<Arc<Agent>, OrchestratorError> {
        Orchestrator::create_agent(self, config).await
    }

    async fn create_memory(&self, config: MemoryConfig) -> Result<Arc<Memory>, OrchestratorError> {
        Orchestrator::create_memory(self, config).await
    }

    async fn create_workflow(
        &self,
        config: WorkflowConfig,
    ) -> Result<Arc<Workflow>, OrchestratorError> {
        Orchestrator::create_workflow(self, config).await
    }

    async fn create_task(&self, config: TaskConfig) -> Result<Arc<Task>, OrchestratorError> {
        Orchestrator::create_task(self, config).await
    }

    async fn adopt_custom(&self, entity: Arc<dyn CustomEntity>) -> Result<(), OrchestratorError> {
        self.register_custom(entity).await
    }
}
