//! 两阶段恢复：阶段一按清单顺序逐个重建实体并登记，阶段二统一解析引用
//!
//! 单个实体的失败（bundle 缺失、无法解码、版本不支持、无恢复器、恢复器出错）
//! 只记日志并写入报告的 skipped，不会中止整次恢复。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::AgentConfig;
use crate::core::RestorationError;
use crate::memory::{MemoryConfig, MemoryKind, Message};
use crate::state::bundle::{EncodedValue, EntityReference, EntityType, StateBundle, STATE_VERSION};
use crate::state::checkpoint::ManifestEntry;
use crate::state::context::RestorationContext;
use crate::state::entity::{attr, EntityFactory, EntityHandle};
use crate::state::storage::StorageProvider;
use crate::workflow::{TaskConfig, TaskProgress, WorkflowConfig, WorkflowProgress};

/// 按类型注册的实体恢复器
///
/// 实现者通过 `factory` 创建实体（沿用 bundle 中的 id），复制普通数据，
/// 把自己登记到 `ctx`，并把每个引用字段作为待解析引用入队，而不是立即解析。
#[async_trait]
pub trait EntityRestorer: Send + Sync {
    async fn restore(
        &self,
        bundle: &StateBundle,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, RestorationError>;
}

/// 恢复中被跳过的实体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntity {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub reason: String,
}

/// 一次恢复的结果
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub checkpoint_id: String,
    pub restored: Vec<EntityReference>,
    pub skipped: Vec<SkippedEntity>,
    pub resolved_references: usize,
    pub dangling_references: usize,
}

impl RestoreReport {
    /// 所有实体都已重建且所有引用都已挂回
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.dangling_references == 0
    }

    pub fn restored_count(&self, entity_type: &EntityType) -> usize {
        self.restored
            .iter()
            .filter(|r| &r.entity_type == entity_type)
            .count()
    }
}

/// 恢复器注册表；启动时构建，由 CheckpointManager 持有
#[derive(Clone, Default)]
pub struct RestoreManager {
    restorers: HashMap<EntityType, Arc<dyn EntityRestorer>>,
}

impl RestoreManager {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册四类内置实体的恢复器
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(EntityType::Agent, Arc::new(AgentRestorer));
        manager.register(EntityType::Memory, Arc::new(MemoryRestorer));
        manager.register(EntityType::Workflow, Arc::new(WorkflowRestorer));
        manager.register(EntityType::Task, Arc::new(TaskRestorer));
        manager
    }

    pub fn register(&mut self, entity_type: EntityType, restorer: Arc<dyn EntityRestorer>) {
        if self.restorers.insert(entity_type.clone(), restorer).is_some() {
            tracing::debug!(entity_type = %entity_type, "restorer replaced");
        }
    }

    pub fn has_restorer(&self, entity_type: &EntityType) -> bool {
        self.restorers.contains_key(entity_type)
    }

    /// 按清单条目恢复；只有非实体级的失败才返回 Err
    pub async fn restore(
        &self,
        checkpoint_id: &str,
        entries: &[ManifestEntry],
        storage: &dyn StorageProvider,
        factory: &dyn EntityFactory,
    ) -> Result<RestoreReport, RestorationError> {
        let mut ctx = RestorationContext::new();
        let mut report = RestoreReport {
            checkpoint_id: checkpoint_id.to_string(),
            ..RestoreReport::default()
        };

        for entry in entries {
            match self.restore_entry(entry, storage, factory, &mut ctx).await {
                Ok(handle) => report.restored.push(handle.reference()),
                Err(reason) => {
                    tracing::warn!(
                        checkpoint_id = %checkpoint_id,
                        entity_type = %entry.entity_type,
                        entity_id = %entry.entity_id,
                        reason = %reason,
                        "entity skipped during restore"
                    );
                    report.skipped.push(SkippedEntity {
                        entity_type: entry.entity_type.clone(),
                        entity_id: entry.entity_id.clone(),
                        reason,
                    });
                }
            }
        }

        let summary = ctx.resolve_references().await;
        report.resolved_references = summary.resolved;
        report.dangling_references = summary.dangling;

        tracing::info!(
            checkpoint_id = %checkpoint_id,
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            resolved_references = report.resolved_references,
            dangling_references = report.dangling_references,
            "checkpoint restored"
        );
        Ok(report)
    }

    /// 阶段一中的单个实体；Err 是跳过原因
    async fn restore_entry(
        &self,
        entry: &ManifestEntry,
        storage: &dyn StorageProvider,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, String> {
        let bytes = storage
            .retrieve(&entry.bundle_key)
            .await
            .map_err(|e| format!("bundle unreadable: {e}"))?
            .ok_or_else(|| format!("bundle missing at {}", entry.bundle_key))?;
        let bundle =
            StateBundle::deserialize(&bytes).map_err(|e| format!("bundle undecodable: {e}"))?;

        if bundle.entity_type != entry.entity_type || bundle.entity_id != entry.entity_id {
            return Err(format!(
                "bundle holds {} instead of {}/{}",
                bundle.reference(),
                entry.entity_type,
                entry.entity_id
            ));
        }
        if bundle.state_version != STATE_VERSION {
            return Err(RestorationError::UnsupportedVersion {
                entity_type: bundle.entity_type.to_string(),
                version: bundle.state_version.clone(),
            }
            .to_string());
        }

        let restorer = self
            .restorers
            .get(&bundle.entity_type)
            .ok_or_else(|| format!("no restorer registered for {}", bundle.entity_type))?;
        let handle = restorer
            .restore(&bundle, factory, ctx)
            .await
            .map_err(|e| e.to_string())?;

        if let EntityHandle::Custom(custom) = &handle {
            factory
                .adopt_custom(Arc::clone(custom))
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(handle)
    }
}

/// 读取 data 中的必需字段
fn required<T: DeserializeOwned>(bundle: &StateBundle, name: &str) -> Result<T, RestorationError> {
    let value = bundle
        .field(name)
        .ok_or_else(|| invalid(bundle, format!("missing field '{name}'")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| invalid(bundle, format!("field '{name}': {e}")))
}

fn invalid(bundle: &StateBundle, reason: String) -> RestorationError {
    RestorationError::InvalidData {
        entity_type: bundle.entity_type.to_string(),
        entity_id: bundle.entity_id.clone(),
        reason,
    }
}

/// 恢复 Agent：重建配置、复制历史、入队 memory 与 tools
pub struct AgentRestorer;

#[async_trait]
impl EntityRestorer for AgentRestorer {
    async fn restore(
        &self,
        bundle: &StateBundle,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, RestorationError> {
        let mut config: AgentConfig = required(bundle, "config")?;
        config.id = Some(bundle.entity_id.clone());
        let agent = factory.create_agent(config).await?;

        let mut history = Vec::new();
        for raw in bundle
            .field("history")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let parsed = match EncodedValue::from_value(raw.clone()) {
                EncodedValue::Plain(v) => serde_json::from_value::<Message>(v).ok(),
                EncodedValue::Unencodable { .. } => None,
            };
            match parsed {
                Some(message) => history.push(message),
                None => tracing::warn!(agent = %bundle.entity_id, "history entry dropped"),
            }
        }
        agent.restore_history(history).await;

        let handle = EntityHandle::Agent(agent);
        ctx.register(handle.clone());
        if let Some(reference) = EntityReference::from_optional(bundle.field(attr::MEMORY)) {
            ctx.add_pending_reference(handle.clone(), attr::MEMORY, reference);
        }
        for raw in bundle
            .field(attr::TOOLS)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(reference) = EntityReference::from_value(raw) {
                ctx.add_pending_reference(handle.clone(), attr::TOOLS, reference);
            }
        }
        Ok(handle)
    }
}

/// 恢复 Memory：按声明的层级重建，重放条目（跳过降级占位），入队 long_term
pub struct MemoryRestorer;

#[async_trait]
impl EntityRestorer for MemoryRestorer {
    async fn restore(
        &self,
        bundle: &StateBundle,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, RestorationError> {
        let kind: MemoryKind = required(bundle, "kind")?;
        let memory = factory
            .create_memory(MemoryConfig::new(kind).with_id(bundle.entity_id.clone()))
            .await?;

        if let Some(items) = bundle.field("items").and_then(Value::as_object) {
            for (key, raw) in items {
                match EncodedValue::from_value(raw.clone()) {
                    EncodedValue::Plain(v) => memory.insert(key.clone(), v).await,
                    EncodedValue::Unencodable { type_name, .. } => tracing::warn!(
                        memory = %bundle.entity_id,
                        key = %key,
                        type_name = %type_name,
                        "memory item was not encodable at checkpoint time, skipping"
                    ),
                }
            }
        }

        let handle = EntityHandle::Memory(memory);
        ctx.register(handle.clone());
        if let Some(reference) = EntityReference::from_optional(bundle.field(attr::LONG_TERM)) {
            ctx.add_pending_reference(handle.clone(), attr::LONG_TERM, reference);
        }
        Ok(handle)
    }
}

/// 恢复 Workflow：用配置重建，套回进度（中断的步骤重新就绪），入队各步骤的 Agent
pub struct WorkflowRestorer;

#[async_trait]
impl EntityRestorer for WorkflowRestorer {
    async fn restore(
        &self,
        bundle: &StateBundle,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, RestorationError> {
        let mut config: WorkflowConfig = required(bundle, "config")?;
        config.id = Some(bundle.entity_id.clone());
        let progress: WorkflowProgress = required(bundle, "progress")?;
        let workflow = factory.create_workflow(config).await?;
        workflow.restore_progress(progress).await;

        let handle = EntityHandle::Workflow(workflow);
        ctx.register(handle.clone());
        if let Some(agents) = bundle.field("step_agents").and_then(Value::as_object) {
            for (step_id, raw) in agents {
                if let Some(reference) = EntityReference::from_value(raw) {
                    ctx.add_pending_reference(handle.clone(), attr::step_agent(step_id), reference);
                }
            }
        }
        Ok(handle)
    }
}

/// 恢复 Task：用配置重建，套回进度（Running 回到 Pending），入队 agent
pub struct TaskRestorer;

#[async_trait]
impl EntityRestorer for TaskRestorer {
    async fn restore(
        &self,
        bundle: &StateBundle,
        factory: &dyn EntityFactory,
        ctx: &mut RestorationContext,
    ) -> Result<EntityHandle, RestorationError> {
        let mut config: TaskConfig = required(bundle, "config")?;
        config.id = Some(bundle.entity_id.clone());
        let progress: TaskProgress = required(bundle, "progress")?;
        let task = factory.create_task(config).await?;
        task.restore_progress(progress).await;

        let handle = EntityHandle::Task(task);
        ctx.register(handle.clone());
        if let Some(reference) = EntityReference::from_optional(bundle.field(attr::AGENT)) {
            ctx.add_pending_reference(handle.clone(), attr::AGENT, reference);
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::core::OrchestratorError;
    use crate::memory::Memory;
    use crate::state::encoder::StateEncoder;
    use crate::state::memory_storage::InMemoryStorage;
    use crate::workflow::{Task, TaskState, Workflow, WorkflowBuilder, WorkflowStatus};
    use serde_json::json;
    use tokio::sync::Mutex;

    /// 只记录创建结果的最小工厂
    #[derive(Default)]
    struct RecordingFactory {
        created: Mutex<Vec<EntityHandle>>,
    }

    #[async_trait]
    impl EntityFactory for RecordingFactory {
        async fn create_agent(&self, config: AgentConfig) -> Result<Arc<Agent>, OrchestratorError> {
            let id = config.id.clone().unwrap_or_default();
            let agent = Arc::new(Agent::new(id, config, 10));
            self.created.lock().await.push(EntityHandle::Agent(Arc::clone(&agent)));
            Ok(agent)
        }

        async fn create_memory(&self, config: MemoryConfig) -> Result<Arc<Memory>, OrchestratorError> {
            let memory = Arc::new(Memory::new(config.id.unwrap_or_default(), config.kind));
            self.created.lock().await.push(EntityHandle::Memory(Arc::clone(&memory)));
            Ok(memory)
        }

        async fn create_workflow(
            &self,
            config: WorkflowConfig,
        ) -> Result<Arc<Workflow>, OrchestratorError> {
            let id = config.id.clone().unwrap_or_default();
            Ok(Arc::new(Workflow::new(id, config)?))
        }

        async fn create_task(&self, config: TaskConfig) -> Result<Arc<Task>, OrchestratorError> {
            let id = config.id.clone().unwrap_or_default();
            Ok(Arc::new(Task::new(id, config)))
        }
    }

    async fn stage(storage: &InMemoryStorage, handles: &[EntityHandle]) -> Vec<ManifestEntry> {
        let encoder = StateEncoder::new();
        let mut entries = Vec::new();
        for handle in handles {
            let bundle = encoder.encode(handle).await.unwrap();
            let key = format!("cp/{}/{}.json", bundle.entity_type, bundle.entity_id);
            storage.store(&key, &bundle.serialize().unwrap()).await.unwrap();
            entries.push(ManifestEntry {
                entity_type: bundle.entity_type.clone(),
                entity_id: bundle.entity_id.clone(),
                bundle_key: key,
            });
        }
        entries
    }

    #[tokio::test]
    async fn test_restore_agent_with_memory_in_either_order() {
        let memory = Arc::new(Memory::new("m1", MemoryKind::ShortTerm));
        memory.insert("topic", "rust").await;
        let agent = Arc::new(Agent::new("a1", AgentConfig::new("A1", "reactive"), 10));
        agent.record(Message::user("hello")).await;
        agent.set_memory(Some(Arc::clone(&memory))).await;

        let storage = InMemoryStorage::new();
        let mut entries = stage(
            &storage,
            &[EntityHandle::Agent(agent), EntityHandle::Memory(memory)],
        )
        .await;

        for _ in 0..2 {
            let factory = RecordingFactory::default();
            let report = RestoreManager::with_defaults()
                .restore("cp", &entries, &storage, &factory)
                .await
                .unwrap();
            assert!(report.is_complete());
            assert_eq!(report.resolved_references, 1);

            let created = factory.created.lock().await;
            let agent = created.iter().find_map(EntityHandle::as_agent).unwrap();
            let memory = created.iter().find_map(EntityHandle::as_memory).unwrap();
            assert!(Arc::ptr_eq(&agent.memory().await.unwrap(), memory));
            assert_eq!(agent.history().await.len(), 1);
            assert_eq!(memory.get("topic").await, Some(json!("rust")));
            drop(created);
            entries.reverse();
        }
    }

    #[tokio::test]
    async fn test_missing_bundle_and_unknown_type_are_skipped() {
        let agent = Arc::new(Agent::new("a1", AgentConfig::new("A1", "reactive"), 10));
        let storage = InMemoryStorage::new();
        let mut entries = stage(&storage, &[EntityHandle::Agent(agent)]).await;
        entries.push(ManifestEntry {
            entity_type: EntityType::Memory,
            entity_id: "gone".into(),
            bundle_key: "cp/Memory/gone.json".into(),
        });
        let gadget = StateBundle::new(EntityType::from("Gadget"), "g1", json!({}));
        storage
            .store("cp/Gadget/g1.json", &gadget.serialize().unwrap())
            .await
            .unwrap();
        entries.push(ManifestEntry {
            entity_type: EntityType::from("Gadget"),
            entity_id: "g1".into(),
            bundle_key: "cp/Gadget/g1.json".into(),
        });

        let factory = RecordingFactory::default();
        let report = RestoreManager::with_defaults()
            .restore("cp", &entries, &storage, &factory)
            .await
            .unwrap();
        assert_eq!(report.restored_count(&EntityType::Agent), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.skipped[0].reason.contains("missing"));
        assert!(report.skipped[1].reason.contains("no restorer"));
    }

    #[tokio::test]
    async fn test_unsupported_version_is_skipped() {
        let agent = Arc::new(Agent::new("a1", AgentConfig::new("A1", "reactive"), 10));
        let mut bundle = StateEncoder::new()
            .encode(&EntityHandle::Agent(agent))
            .await
            .unwrap();
        bundle.state_version = "2.0".into();
        let storage = InMemoryStorage::new();
        storage.store("b.json", &bundle.serialize().unwrap()).await.unwrap();
        let entries = vec![ManifestEntry {
            entity_type: EntityType::Agent,
            entity_id: "a1".into(),
            bundle_key: "b.json".into(),
        }];

        let report = RestoreManager::with_defaults()
            .restore("cp", &entries, &storage, &RecordingFactory::default())
            .await
            .unwrap();
        assert!(report.restored.is_empty());
        assert!(report.skipped[0].reason.contains("2.0"));
    }

    #[tokio::test]
    async fn test_workflow_and_task_resume_position() {
        let agent = Arc::new(Agent::new("a1", AgentConfig::new("A1", "reactive"), 10));
        let config = WorkflowBuilder::new("plan")
            .step("extract", "Extract")
            .step("map", "Map")
            .sequential("extract", "map")
            .build()
            .unwrap();
        let workflow = Arc::new(Workflow::new("wf1", config).unwrap());
        workflow.assign_agent("extract", Arc::clone(&agent)).await.unwrap();
        workflow.start().await;
        workflow.mark_step_running("extract").await.unwrap();

        let task = Arc::new(Task::new("t1", TaskConfig::new("classify")));
        task.set_agent(Some(Arc::clone(&agent))).await;
        task.start().await.unwrap();

        let storage = InMemoryStorage::new();
        let entries = stage(
            &storage,
            &[
                EntityHandle::Workflow(workflow),
                EntityHandle::Task(task),
                EntityHandle::Agent(agent),
            ],
        )
        .await;

        let factory = RecordingFactory::default();
        let report = RestoreManager::with_defaults()
            .restore("cp", &entries, &storage, &factory)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.resolved_references, 2);
        assert_eq!(report.restored_count(&EntityType::Workflow), 1);
        assert_eq!(report.restored_count(&EntityType::Task), 1);
        assert_eq!(report.restored.len(), 3);
    }

    #[tokio::test]
    async fn test_workflow_restorer_resets_in_flight_state() {
        let config = WorkflowBuilder::new("plan").step("s1", "S1").build().unwrap();
        let workflow = Arc::new(Workflow::new("wf1", config).unwrap());
        workflow.start().await;
        workflow.mark_step_running("s1").await.unwrap();
        let bundle = StateEncoder::new()
            .encode(&EntityHandle::Workflow(workflow))
            .await
            .unwrap();

        let mut ctx = RestorationContext::new();
        let handle = WorkflowRestorer
            .restore(&bundle, &RecordingFactory::default(), &mut ctx)
            .await
            .unwrap();
        let restored = handle.as_workflow().unwrap();
        assert_eq!(restored.id(), "wf1");
        assert_eq!(restored.status().await, WorkflowStatus::Paused);
        assert_eq!(restored.step("s1").await.unwrap().state, TaskState::Ready);
        assert_eq!(ctx.len(), 1);
    }

    #[tokio::test]
    async fn test_restorer_rejects_malformed_data() {
        let bundle = StateBundle::new(EntityType::Task, "t1", json!({"config": 42}));
        let mut ctx = RestorationContext::new();
        let err = TaskRestorer
            .restore(&bundle, &RecordingFactory::default(), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RestorationError::InvalidData { .. }));
        assert!(ctx.is_empty());
    }
}
