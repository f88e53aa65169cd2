//! 编排器构建器：统一的初始化逻辑
//!
//! 根据配置选择存储，注册自定义实体的编码器与恢复器，最后组装 CheckpointManager。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::orchestrator::Orchestrator;
use crate::core::OrchestratorError;
use crate::state::{
    CheckpointManager, EntityEncoder, EntityRestorer, EntityType, FileStorage, RestoreManager,
    StateEncoder, StorageProvider,
};

pub struct OrchestratorBuilder {
    config: AppConfig,
    storage: Option<Arc<dyn StorageProvider>>,
    encoder: StateEncoder,
    restorers: RestoreManager,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            storage: None,
            encoder: StateEncoder::new(),
            restorers: RestoreManager::with_defaults(),
        }
    }

    /// 指定存储；未指定时使用 `[storage] base_dir` 下的 FileStorage
    pub fn storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 注册自定义实体类型的编码器与恢复器
    pub fn register_custom(
        mut self,
        type_name: &str,
        encoder: Arc<dyn EntityEncoder>,
        restorer: Arc<dyn EntityRestorer>,
    ) -> Self {
        self.encoder.register(type_name, encoder);
        self.restorers
            .register(EntityType::Custom(type_name.to_string()), restorer);
        self
    }

    /// 替换某个内置类型的恢复器
    pub fn restorer(mut self, entity_type: EntityType, restorer: Arc<dyn EntityRestorer>) -> Self {
        self.restorers.register(entity_type, restorer);
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        if self.config.agents.history_turns == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "agents.history_turns must be at least 1".to_string(),
            ));
        }
        for name in ["Agent", "Memory", "Workflow", "Task"] {
            if self.encoder.supports(&EntityType::Custom(name.to_string())) {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "custom type name '{name}' collides with a built-in entity type"
                )));
            }
        }

        let storage = match self.storage {
            Some(storage) => storage,
            None => {
                let storage = &self.config.storage;
                tracing::info!(base_dir = %storage.base_dir.display(), fsync = storage.fsync, "using file storage");
                Arc::new(FileStorage::new(&storage.base_dir).with_fsync(storage.fsync))
                    as Arc<dyn StorageProvider>
            }
        };

        let checkpoints = CheckpointManager::new(storage)
            .with_encoder(self.encoder)
            .with_restore_manager(self.restorers);
        Ok(Orchestrator::from_parts(self.config, checkpoints))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_history() {
        let mut config = AppConfig::default();
        config.agents.history_turns = 0;
        assert!(matches!(
            OrchestratorBuilder::new(config).build(),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_storage_is_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.base_dir = dir.path().join("store");
        let orch = OrchestratorBuilder::new(config).build().unwrap();
        assert!(orch.checkpoints().restore_manager().has_restorer(&EntityType::Agent));
        assert_eq!(orch.config().agents.history_turns, 20);
    }
}
