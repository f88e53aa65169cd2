//! 检查点管理：发现 → 编码 → 单事务写入；以及列出 / 读取 / 删除 / 恢复
//!
//! 存储布局（相对于存储根）：
//! - `checkpoints/<id>/manifest.json`
//! - `checkpoints/<id>/entities/<EntityType>/<entity_id>.json`
//! - `checkpoints/latest.txt`（纯文本，最新检查点 id）
//! - `entities/<EntityType>/<entity_id>.json`（单实体即时保存，不属于任何检查点）
//!
//! 事务里先暂存全部 bundle，再暂存 latest 指针，最后暂存清单；
//! 清单可见即意味着整个检查点都已落盘。提交中途失败时，已落盘的
//! `checkpoints/<id>/` 键被清除，latest 指针恢复原值。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{CheckpointError, EncodeError, RestorationError, TransactionError};
use crate::state::bundle::{is_key_segment, EntityType, StateBundle};
use crate::state::encoder::{EntityEncoder, StateEncoder};
use crate::state::entity::{EntityFactory, EntityHandle, StatefulContainer};
use crate::state::restorer::{EntityRestorer, RestoreManager, RestoreReport};
use crate::state::storage::{join_key, StorageProvider, Transaction};

const CHECKPOINTS_PREFIX: &str = "checkpoints";
const ENTITIES_PREFIX: &str = "entities";
const MANIFEST_FILE: &str = "manifest.json";
const LATEST_KEY: &str = "checkpoints/latest.txt";

/// 清单中的一个实体条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub bundle_key: String,
}

/// 检查点清单；创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub checkpoint_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub entities: Vec<ManifestEntry>,
}

impl CheckpointManifest {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn count_of(&self, entity_type: &EntityType) -> usize {
        self.entities
            .iter()
            .filter(|e| &e.entity_type == entity_type)
            .count()
    }
}

fn manifest_key(checkpoint_id: &str) -> String {
    join_key(&[CHECKPOINTS_PREFIX, checkpoint_id, MANIFEST_FILE])
}

fn bundle_key(checkpoint_id: &str, entity_type: &EntityType, entity_id: &str) -> String {
    join_key(&[
        CHECKPOINTS_PREFIX,
        checkpoint_id,
        ENTITIES_PREFIX,
        entity_type.as_str(),
        &format!("{entity_id}.json"),
    ])
}

fn entity_key(entity_type: &EntityType, entity_id: &str) -> String {
    join_key(&[
        ENTITIES_PREFIX,
        entity_type.as_str(),
        &format!("{entity_id}.json"),
    ])
}

/// `checkpoints/<id>/manifest.json` → `<id>`
fn checkpoint_id_of(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(CHECKPOINTS_PREFIX)?.strip_prefix('/')?;
    let (id, file) = rest.split_once('/')?;
    (file == MANIFEST_FILE).then_some(id)
}

fn default_name(at: DateTime<Utc>) -> String {
    format!("checkpoint-{}", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

pub struct CheckpointManager {
    storage: Arc<dyn StorageProvider>,
    encoder: StateEncoder,
    restorers: RestoreManager,
    /// 上一次分配的创建时间；保证同一管理器内严格递增
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl CheckpointManager {
    /// 使用内置编码器与 `RestoreManager::with_defaults()`
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            encoder: StateEncoder::new(),
            restorers: RestoreManager::with_defaults(),
            last_created: Mutex::new(None),
        }
    }

    pub fn with_encoder(mut self, encoder: StateEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn with_restore_manager(mut self, restorers: RestoreManager) -> Self {
        self.restorers = restorers;
        self
    }

    /// 为自定义实体类型同时注册编码器与恢复器
    pub fn register_custom(
        &mut self,
        type_name: &str,
        encoder: Arc<dyn EntityEncoder>,
        restorer: Arc<dyn EntityRestorer>,
    ) {
        self.encoder.register(type_name, encoder);
        self.restorers
            .register(EntityType::Custom(type_name.to_string()), restorer);
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn encoder(&self) -> &StateEncoder {
        &self.encoder
    }

    pub fn restore_manager(&self) -> &RestoreManager {
        &self.restorers
    }

    /// 创建检查点并返回其 id；要么完整存在，要么完全不存在
    pub async fn create_checkpoint(
        &self,
        container: &dyn StatefulContainer,
        name: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<String, CheckpointError> {
        let checkpoint_id = uuid::Uuid::new_v4().to_string();
        let created_at = self.next_created_at();
        let name = name.map_or_else(|| default_name(created_at), str::to_string);

        let entities = container.list_entities().await;
        // 提交失败时用来恢复 latest 指针
        let previous_latest = match self.storage.retrieve(LATEST_KEY).await {
            Ok(pointer) => pointer,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read latest pointer before checkpoint");
                None
            }
        };
        let mut tx = self.storage.create_transaction().await?;
        tracing::debug!(
            checkpoint_id = %checkpoint_id,
            tx_id = %tx.id(),
            discovered = entities.len(),
            "creating checkpoint"
        );

        let mut manifest = CheckpointManifest {
            checkpoint_id: checkpoint_id.clone(),
            created_at,
            name,
            metadata: metadata.unwrap_or_default(),
            entities: Vec::with_capacity(entities.len()),
        };

        if let Err(e) = self.stage(tx.as_mut(), &entities, &mut manifest).await {
            abandon(tx.as_mut(), &checkpoint_id).await;
            return Err(e);
        }

        if let Err(source) = tx.commit().await {
            tracing::error!(checkpoint_id = %checkpoint_id, error = %source, "checkpoint commit failed");
            abandon(tx.as_mut(), &checkpoint_id).await;
            self.discard_partial(&checkpoint_id, previous_latest).await;
            return Err(CheckpointError::Create {
                checkpoint_id,
                source,
            });
        }

        tracing::info!(
            checkpoint_id = %checkpoint_id,
            name = %manifest.name,
            entities = manifest.entities.len(),
            skipped = entities.len() - manifest.entities.len(),
            "checkpoint created"
        );
        Ok(checkpoint_id)
    }

    /// 时钟粒度较粗时同一时刻可能创建多个检查点，这里把时间往后推一微秒
    fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self
            .last_created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }

    /// 提交中途失败后清除已落盘的部分；清理本身的失败只记录
    async fn discard_partial(&self, checkpoint_id: &str, previous_latest: Option<Vec<u8>>) {
        let prefix = format!("{CHECKPOINTS_PREFIX}/{checkpoint_id}/");
        match self.storage.list_keys(&prefix).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.storage.delete(&key).await {
                        tracing::error!(key = %key, error = %e, "failed to remove partial checkpoint key");
                    }
                }
            }
            Err(e) => tracing::error!(checkpoint_id = %checkpoint_id, error = %e, "failed to list partial checkpoint keys"),
        }

        let pointer = match self.storage.retrieve(LATEST_KEY).await {
            Ok(pointer) => pointer,
            Err(e) => {
                tracing::error!(error = %e, "failed to read latest pointer after failed commit");
                return;
            }
        };
        let moved = pointer
            .as_deref()
            .is_some_and(|bytes| String::from_utf8_lossy(bytes).trim() == checkpoint_id);
        if !moved {
            return;
        }
        let restored = match previous_latest {
            Some(bytes) => self.storage.store(LATEST_KEY, &bytes).await,
            None => self.storage.delete(LATEST_KEY).await.map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::error!(error = %e, "failed to restore latest pointer after failed commit");
        }
    }

    /// 暂存全部 bundle、latest 指针、清单；单个实体的编码失败只跳过
    async fn stage(
        &self,
        tx: &mut dyn Transaction,
        entities: &[EntityHandle],
        manifest: &mut CheckpointManifest,
    ) -> Result<(), CheckpointError> {
        let checkpoint_id = manifest.checkpoint_id.clone();
        let staged = |source: TransactionError| CheckpointError::Create {
            checkpoint_id: checkpoint_id.clone(),
            source,
        };
        let mut seen = HashSet::new();
        for entity in entities {
            let entity_type = entity.entity_type();
            let entity_id = entity.entity_id();
            if !seen.insert((entity_type.clone(), entity_id.to_string())) {
                tracing::debug!(entity = %entity.reference(), "entity discovered twice, ignoring duplicate");
                continue;
            }

            let bytes = match self.encode(entity).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(
                        checkpoint_id = %checkpoint_id,
                        entity = %entity.reference(),
                        error = %e,
                        "entity skipped, cannot be encoded"
                    );
                    continue;
                }
            };

            let key = bundle_key(&checkpoint_id, &entity_type, entity_id);
            tx.store(&key, &bytes).await.map_err(staged)?;
            manifest.entities.push(ManifestEntry {
                entity_type,
                entity_id: entity_id.to_string(),
                bundle_key: key,
            });
        }

        let bytes = serde_json::to_vec_pretty(&*manifest)?;
        tx.store(LATEST_KEY, checkpoint_id.as_bytes())
            .await
            .map_err(staged)?;
        tx.store(&manifest_key(&checkpoint_id), &bytes)
            .await
            .map_err(staged)?;
        Ok(())
    }

    /// 编码成 bundle 字节；类型名或 id 不能作为存储键时视为编码失败
    async fn encode(&self, entity: &EntityHandle) -> Result<Vec<u8>, EncodeError> {
        let entity_type = entity.entity_type();
        if !entity_type.is_key_safe() || !is_key_segment(entity.entity_id()) {
            return Err(EncodeError::Entity {
                entity_type: entity_type.to_string(),
                entity_id: entity.entity_id().to_string(),
                reason: "type name or id is not usable as a storage key".to_string(),
            });
        }
        let bundle = self.encoder.encode(entity).await?;
        Ok(bundle.serialize()?)
    }

    /// 按 id 读取清单；不存在时返回 None
    pub async fn get_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointManifest>, CheckpointError> {
        Ok(self.read_manifest(checkpoint_id).await?)
    }

    async fn read_manifest(
        &self,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointManifest>, RestorationError> {
        if !is_key_segment(checkpoint_id) {
            return Ok(None);
        }
        let Some(bytes) = self.storage.retrieve(&manifest_key(checkpoint_id)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RestorationError::ManifestUnreadable {
                checkpoint_id: checkpoint_id.to_string(),
                reason: e.to_string(),
            })
    }

    /// latest 指针指向的检查点；指针缺失时返回 None，指针失效时退回到最新创建的那个
    pub async fn get_latest_checkpoint(&self) -> Result<Option<CheckpointManifest>, CheckpointError> {
        let pointer = self
            .storage
            .retrieve(LATEST_KEY)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|id| !id.is_empty());

        let Some(latest_id) = pointer else {
            return Ok(None);
        };
        if let Some(manifest) = self.get_checkpoint(&latest_id).await? {
            return Ok(Some(manifest));
        }
        tracing::warn!(checkpoint_id = %latest_id, "latest pointer is stale, falling back to newest manifest");
        Ok(self.list_checkpoints().await?.into_iter().next())
    }

    /// 全部检查点，按创建时间从新到旧；无法解析的清单被跳过
    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointManifest>, CheckpointError> {
        let keys = self.storage.list_keys(CHECKPOINTS_PREFIX).await?;
        let mut manifests = Vec::new();
        for id in keys.iter().filter_map(|k| checkpoint_id_of(k)) {
            match self.read_manifest(id).await {
                Ok(Some(manifest)) => manifests.push(manifest),
                Ok(None) => {}
                Err(e) => tracing::warn!(checkpoint_id = %id, error = %e, "skipping unreadable manifest"),
            }
        }
        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.checkpoint_id.cmp(&b.checkpoint_id))
        });
        Ok(manifests)
    }

    /// 先按 id 精确匹配，再按名字匹配最新的一个
    pub async fn resolve_checkpoint(
        &self,
        id_or_name: &str,
    ) -> Result<Option<CheckpointManifest>, CheckpointError> {
        if let Some(manifest) = self.get_checkpoint(id_or_name).await? {
            return Ok(Some(manifest));
        }
        Ok(self
            .list_checkpoints()
            .await?
            .into_iter()
            .find(|m| m.name == id_or_name))
    }

    /// 删除检查点；id 不存在时返回 false 且不做任何写入
    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, CheckpointError> {
        let Some(manifest) = self.get_checkpoint(checkpoint_id).await? else {
            return Ok(false);
        };

        for entry in &manifest.entities {
            self.storage.delete(&entry.bundle_key).await?;
        }
        let manifest_key = manifest_key(checkpoint_id);
        let prefix = format!("{CHECKPOINTS_PREFIX}/{checkpoint_id}/");
        for key in self.storage.list_keys(&prefix).await? {
            if key != manifest_key {
                tracing::debug!(key = %key, "removing stray checkpoint key");
                self.storage.delete(&key).await?;
            }
        }
        self.storage.delete(&manifest_key).await?;

        let pointer = self.storage.retrieve(LATEST_KEY).await?;
        let was_latest = pointer
            .as_deref()
            .is_some_and(|bytes| String::from_utf8_lossy(bytes).trim() == checkpoint_id);
        if was_latest {
            match self.list_checkpoints().await?.first() {
                Some(next) => {
                    self.storage
                        .store(LATEST_KEY, next.checkpoint_id.as_bytes())
                        .await?;
                    tracing::debug!(checkpoint_id = %next.checkpoint_id, "latest pointer moved");
                }
                None => {
                    self.storage.delete(LATEST_KEY).await?;
                }
            }
        }

        tracing::info!(checkpoint_id = %checkpoint_id, name = %manifest.name, "checkpoint deleted");
        Ok(true)
    }

    /// 两阶段恢复到 `factory` 所代表的宿主实例
    pub async fn restore_checkpoint(
        &self,
        factory: &dyn EntityFactory,
        checkpoint_id: &str,
    ) -> Result<RestoreReport, CheckpointError> {
        let manifest = self
            .read_manifest(checkpoint_id)
            .await?
            .ok_or_else(|| RestorationError::ManifestNotFound(checkpoint_id.to_string()))?;
        let report = self
            .restorers
            .restore(
                &manifest.checkpoint_id,
                &manifest.entities,
                self.storage.as_ref(),
                factory,
            )
            .await?;
        Ok(report)
    }

    /// 即时保存单个实体（不属于任何检查点），返回存储键
    pub async fn save_entity(&self, entity: &EntityHandle) -> Result<String, CheckpointError> {
        let bytes = self.encode(entity).await?;
        let key = entity_key(&entity.entity_type(), entity.entity_id());
        self.storage.store(&key, &bytes).await?;
        tracing::debug!(key = %key, "entity saved");
        Ok(key)
    }

    pub async fn load_entity(
        &self,
        entity_type: &EntityType,
        entity_id: &str,
    ) -> Result<Option<StateBundle>, CheckpointError> {
        if !entity_type.is_key_safe() || !is_key_segment(entity_id) {
            return Ok(None);
        }
        match self.storage.retrieve(&entity_key(entity_type, entity_id)).await? {
            Some(bytes) => Ok(Some(StateBundle::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// 回滚失败的事务；已失败的提交会保留暂存区，这里只记录
async fn abandon(tx: &mut dyn Transaction, checkpoint_id: &str) {
    match tx.rollback().await {
        Ok(()) => tracing::debug!(checkpoint_id = %checkpoint_id, tx_id = %tx.id(), "transaction rolled back"),
        Err(TransactionError::Closed(_)) => {
            tracing::warn!(checkpoint_id = %checkpoint_id, tx_id = %tx.id(), "transaction staging kept for inspection")
        }
        Err(e) => tracing::error!(checkpoint_id = %checkpoint_id, error = %e, "rollback failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentConfig};
    use crate::memory::{Memory, MemoryKind};
    use crate::state::memory_storage::InMemoryStorage;
    use async_trait::async_trait;
    use serde_json::json;

    struct Handles(Vec<EntityHandle>);

    #[async_trait]
    impl StatefulContainer for Handles {
        async fn list_entities(&self) -> Vec<EntityHandle> {
            self.0.clone()
        }
    }

    fn manager() -> CheckpointManager {
        CheckpointManager::new(Arc::new(InMemoryStorage::new()))
    }

    fn agent(id: &str) -> EntityHandle {
        EntityHandle::Agent(Arc::new(Agent::new(id, AgentConfig::new(id, "reactive"), 10)))
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(manifest_key("c1"), "checkpoints/c1/manifest.json");
        assert_eq!(
            bundle_key("c1", &EntityType::Agent, "a1"),
            "checkpoints/c1/entities/Agent/a1.json"
        );
        assert_eq!(entity_key(&EntityType::Memory, "m1"), "entities/Memory/m1.json");
        assert_eq!(checkpoint_id_of("checkpoints/c1/manifest.json"), Some("c1"));
        assert_eq!(checkpoint_id_of("checkpoints/latest.txt"), None);
        assert_eq!(checkpoint_id_of("checkpoints/c1/entities/Agent/a1.json"), None);
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let mgr = manager();
        let memory = EntityHandle::Memory(Arc::new(Memory::new("m1", MemoryKind::ShortTerm)));
        let mut meta = Map::new();
        meta.insert("reason".into(), json!("nightly"));

        let id = mgr
            .create_checkpoint(&Handles(vec![agent("a1"), memory]), Some("cp1"), Some(meta))
            .await
            .unwrap();
        let manifest = mgr.get_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(manifest.name, "cp1");
        assert_eq!(manifest.metadata["reason"], json!("nightly"));
        assert_eq!(manifest.entity_count(), 2);
        assert_eq!(manifest.count_of(&EntityType::Memory), 1);
        assert_eq!(
            mgr.get_latest_checkpoint().await.unwrap().unwrap().checkpoint_id,
            id
        );
        assert!(mgr.get_checkpoint("nope").await.unwrap().is_none());
        assert!(mgr.get_checkpoint("../x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_name_and_duplicates() {
        let mgr = manager();
        let a = agent("a1");
        let id = mgr
            .create_checkpoint(&Handles(vec![a.clone(), a]), None, None)
            .await
            .unwrap();
        let manifest = mgr.get_checkpoint(&id).await.unwrap().unwrap();
        assert!(manifest.name.starts_with("checkpoint-"));
        assert_eq!(manifest.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_unsafe_id_is_skipped() {
        let mgr = manager();
        let id = mgr
            .create_checkpoint(&Handles(vec![agent("a/b"), agent("ok")]), None, None)
            .await
            .unwrap();
        let manifest = mgr.get_checkpoint(&id).await.unwrap().unwrap();
        assert_eq!(manifest.entity_count(), 1);
        assert_eq!(manifest.entities[0].entity_id, "ok");
    }

    #[tokio::test]
    async fn test_resolve_by_name_prefers_newest() {
        let mgr = manager();
        let first = mgr
            .create_checkpoint(&Handles(vec![]), Some("daily"), None)
            .await
            .unwrap();
        let second = mgr
            .create_checkpoint(&Handles(vec![]), Some("daily"), None)
            .await
            .unwrap();
        assert_ne!(first, second);
        let first_at = mgr.get_checkpoint(&first).await.unwrap().unwrap().created_at;
        let second_at = mgr.get_checkpoint(&second).await.unwrap().unwrap().created_at;
        assert!(second_at > first_at);
        let resolved = mgr.resolve_checkpoint("daily").await.unwrap().unwrap();
        assert_eq!(resolved.checkpoint_id, second);
        let resolved = mgr.resolve_checkpoint(&first).await.unwrap().unwrap();
        assert_eq!(resolved.checkpoint_id, first);
        assert!(mgr.resolve_checkpoint("weekly").await.unwrap().is_none());
    }

    #[test]
    fn test_created_at_strictly_increases() {
        let mgr = manager();
        let stamps: Vec<_> = (0..1000).map(|_| mgr.next_created_at()).collect();
        assert!(stamps.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_delete_removes_everything_under_prefix() {
        let storage = Arc::new(InMemoryStorage::new());
        let mgr = CheckpointManager::new(storage.clone());
        let id = mgr
            .create_checkpoint(&Handles(vec![agent("a1")]), None, None)
            .await
            .unwrap();
        storage
            .store(&format!("checkpoints/{id}/notes.txt"), b"stray")
            .await
            .unwrap();

        assert!(mgr.delete_checkpoint(&id).await.unwrap());
        assert!(storage.list_keys("checkpoints").await.unwrap().is_empty());
        assert!(mgr.get_latest_checkpoint().await.unwrap().is_none());
        assert!(!mgr.delete_checkpoint(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_unknown_checkpoint() {
        let mgr = manager();
        struct NoFactory;
        #[async_trait]
        impl EntityFactory for NoFactory {
            async fn create_agent(
                &self,
                _: AgentConfig,
            ) -> Result<Arc<Agent>, crate::core::OrchestratorError> {
                unreachable!()
            }
            async fn create_memory(
                &self,
                _: crate::memory::MemoryConfig,
            ) -> Result<Arc<Memory>, crate::core::OrchestratorError> {
                unreachable!()
            }
            async fn create_workflow(
                &self,
                _: crate::workflow::WorkflowConfig,
            ) -> Result<Arc<crate::workflow::Workflow>, crate::core::OrchestratorError> {
                unreachable!()
            }
            async fn create_task(
                &self,
                _: crate::workflow::TaskConfig,
            ) -> Result<Arc<crate::workflow::Task>, crate::core::OrchestratorError> {
                unreachable!()
            }
        }

        let err = mgr.restore_checkpoint(&NoFactory, "ghost").await.unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Restoration(RestorationError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load_entity() {
        let mgr = manager();
        let key = mgr.save_entity(&agent("a1")).await.unwrap();
        assert_eq!(key, "entities/Agent/a1.json");
        let bundle = mgr
            .load_entity(&EntityType::Agent, "a1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bundle.entity_id, "a1");
        assert!(mgr.load_entity(&EntityType::Agent, "a2").await.unwrap().is_none());
        assert!(mgr.save_entity(&agent("a/b")).await.is_err());
    }
}
