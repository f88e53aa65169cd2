//! 恢复上下文：一次恢复过程中「已重建实体」的登记表与「待解析引用」队列
//!
//! 阶段一只登记与入队，阶段二统一解析，所以实体之间的环形引用与清单顺序无关。

use std::collections::HashMap;

use crate::state::bundle::{EntityReference, EntityType};
use crate::state::entity::EntityHandle;

/// 一条待解析引用：把 `reference` 指向的实体挂到 `target` 的 `attribute` 上
#[derive(Debug, Clone)]
pub struct PendingReference {
    pub target: EntityHandle,
    pub attribute: String,
    pub reference: EntityReference,
}

/// 阶段二的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub resolved: usize,
    /// 目标不存在、类型不符或属性未知而未能挂上的引用
    pub dangling: usize,
}

#[derive(Debug, Default)]
pub struct RestorationContext {
    entities: HashMap<(EntityType, String), EntityHandle>,
    pending: Vec<PendingReference>,
}

impl RestorationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记重建出的实体；同类型同 id 重复登记时后者覆盖前者
    pub fn register(&mut self, entity: EntityHandle) {
        let key = (entity.entity_type(), entity.entity_id().to_string());
        if self.entities.insert(key, entity).is_some() {
            tracing::warn!("entity registered twice in restoration context, keeping the latest");
        }
    }

    pub fn get(&self, entity_type: &EntityType, entity_id: &str) -> Option<&EntityHandle> {
        self.entities
            .get(&(entity_type.clone(), entity_id.to_string()))
    }

    pub fn lookup(&self, reference: &EntityReference) -> Option<&EntityHandle> {
        self.get(&reference.entity_type, &reference.entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityHandle> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn add_pending_reference(
        &mut self,
        target: EntityHandle,
        attribute: impl Into<String>,
        reference: EntityReference,
    ) {
        self.pending.push(PendingReference {
            target,
            attribute: attribute.into(),
            reference,
        });
    }

    pub fn pending_references(&self) -> &[PendingReference] {
        &self.pending
    }

    /// 阶段二：逐条解析并挂回，按入队顺序；失败的引用只记日志，属性保持未设置
    pub async fn resolve_references(&mut self) -> ResolutionSummary {
        let mut summary = ResolutionSummary::default();
        for pending in std::mem::take(&mut self.pending) {
            let Some(found) = self.lookup(&pending.reference).cloned() else {
                tracing::warn!(
                    target_entity = %pending.target.reference(),
                    attribute = %pending.attribute,
                    reference = %pending.reference,
                    "dangling reference, attribute left unset"
                );
                summary.dangling += 1;
                continue;
            };

            match pending
                .target
                .assign_reference(&pending.attribute, found)
                .await
            {
                Ok(()) => summary.resolved += 1,
                Err(e) => {
                    tracing::warn!(
                        target_entity = %pending.target.reference(),
                        attribute = %pending.attribute,
                        reference = %pending.reference,
                        error = %e,
                        "reference could not be assigned"
                    );
                    summary.dangling += 1;
                }
            }
        }
        summary
    }
}
