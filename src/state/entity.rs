//! 实体句柄与宿主接口
//!
//! `EntityHandle` 是检查点子系统看到的「一个有状态实体」：内置四类实体各占一个分支，
//! 宿主自定义实体走 `Custom`。编码器按分支穷尽匹配，新增内置类型时编译器会指出所有遗漏。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::{Agent, AgentConfig};
use crate::core::{OrchestratorError, RestorationError};
use crate::memory::{Memory, MemoryConfig};
use crate::state::bundle::{EntityReference, EntityType};
use crate::workflow::{Task, TaskConfig, Workflow, WorkflowConfig};

/// 引用属性名：恢复阶段二按这些名字把解析出的实体挂回去
pub mod attr {
    /// Agent 的 Memory 链接
    pub const MEMORY: &str = "memory";
    /// Agent 的工具链接（追加语义）
    pub const TOOLS: &str = "tools";
    /// Memory 的长期记忆链接
    pub const LONG_TERM: &str = "long_term";
    /// Task 的执行 Agent
    pub const AGENT: &str = "agent";

    const STEP_PREFIX: &str = "steps.";
    const STEP_SUFFIX: &str = ".agent";

    /// Workflow 步骤的执行 Agent：`steps.<step_id>.agent`
    pub fn step_agent(step_id: &str) -> String {
        format!("{STEP_PREFIX}{step_id}{STEP_SUFFIX}")
    }

    pub fn parse_step_agent(attribute: &str) -> Option<&str> {
        attribute
            .strip_prefix(STEP_PREFIX)?
            .strip_suffix(STEP_SUFFIX)
            .filter(|s| !s.is_empty())
    }
}

/// 宿主自定义实体
#[async_trait]
pub trait CustomEntity: Send + Sync {
    /// 类型名，必须与注册编码器 / 恢复器时使用的名字一致
    fn type_name(&self) -> &str;

    fn entity_id(&self) -> &str;

    /// 供自定义编码器向下转型
    fn as_any(&self) -> &dyn Any;

    /// 接收恢复阶段二解析出的引用；默认不接受任何属性
    async fn assign_reference(
        &self,
        attribute: &str,
        _target: EntityHandle,
    ) -> Result<(), RestorationError> {
        Err(RestorationError::UnknownAttribute {
            entity_type: self.type_name().to_string(),
            attribute: attribute.to_string(),
        })
    }
}

/// 对一个活动实体的共享句柄
#[derive(Clone)]
pub enum EntityHandle {
    Agent(Arc<Agent>),
    Memory(Arc<Memory>),
    Workflow(Arc<Workflow>),
    Task(Arc<Task>),
    Custom(Arc<dyn CustomEntity>),
}

impl EntityHandle {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Agent(_) => EntityType::Agent,
            Self::Memory(_) => EntityType::Memory,
            Self::Workflow(_) => EntityType::Workflow,
            Self::Task(_) => EntityType::Task,
            Self::Custom(c) => EntityType::from(c.type_name()),
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::Agent(a) => a.id(),
            Self::Memory(m) => m.id(),
            Self::Workflow(w) => w.id(),
            Self::Task(t) => t.id(),
            Self::Custom(c) => c.entity_id(),
        }
    }

    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.entity_type(), self.entity_id())
    }

    /// 是否指向同一个活动实例
    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        match (self, other) {
            (Self::Agent(a), Self::Agent(b)) => Arc::ptr_eq(a, b),
            (Self::Memory(a), Self::Memory(b)) => Arc::ptr_eq(a, b),
            (Self::Workflow(a), Self::Workflow(b)) => Arc::ptr_eq(a, b),
            (Self::Task(a), Self::Task(b)) => Arc::ptr_eq(a, b),
            (Self::Custom(a), Self::Custom(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }

    pub fn as_agent(&self) -> Option<&Arc<Agent>> {
        match self {
            Self::Agent(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&Arc<Memory>> {
        match self {
            Self::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_workflow(&self) -> Option<&Arc<Workflow>> {
        match self {
            Self::Workflow(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&Arc<Task>> {
        match self {
            Self::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&Arc<dyn CustomEntity>> {
        match self {
            Self::Custom(c) => Some(c),
            _ => None,
        }
    }

    /// 本实体直接链接的其它实体（自定义实体不暴露链接）
    pub async fn links(&self) -> Vec<EntityHandle> {
        match self {
            Self::Agent(agent) => {
                let mut links: Vec<EntityHandle> =
                    agent.memory().await.map(Self::Memory).into_iter().collect();
                links.extend(agent.tools().await);
                links
            }
            Self::Memory(memory) => memory.long_term().await.map(Self::Memory).into_iter().collect(),
            Self::Workflow(workflow) => workflow
                .step_agents()
                .await
                .into_iter()
                .map(|(_, agent)| Self::Agent(agent))
                .collect(),
            Self::Task(task) => task.agent().await.map(Self::Agent).into_iter().collect(),
            Self::Custom(_) => Vec::new(),
        }
    }

    /// 把解析出的目标实体挂到本实体的 `attribute` 上
    pub async fn assign_reference(
        &self,
        attribute: &str,
        target: EntityHandle,
    ) -> Result<(), RestorationError> {
        match self {
            Self::Agent(agent) => match attribute {
                attr::MEMORY => {
                    let memory = expect_memory(attribute, &target)?;
                    agent.set_memory(Some(memory)).await;
                    Ok(())
                }
                attr::TOOLS => {
                    agent.add_tool(target).await;
                    Ok(())
                }
                _ => Err(self.unknown_attribute(attribute)),
            },
            Self::Memory(memory) => match attribute {
                attr::LONG_TERM => {
                    let long_term = expect_memory(attribute, &target)?;
                    memory.set_long_term(Some(long_term)).await;
                    Ok(())
                }
                _ => Err(self.unknown_attribute(attribute)),
            },
            Self::Task(task) => match attribute {
                attr::AGENT => {
                    let agent = expect_agent(attribute, &target)?;
                    task.set_agent(Some(agent)).await;
                    Ok(())
                }
                _ => Err(self.unknown_attribute(attribute)),
            },
            Self::Workflow(workflow) => {
                let step_id = attr::parse_step_agent(attribute)
                    .ok_or_else(|| self.unknown_attribute(attribute))?;
                let agent = expect_agent(attribute, &target)?;
                workflow
                    .assign_agent(step_id, agent)
                    .await
                    .map_err(|_| self.unknown_attribute(attribute))
            }
            Self::Custom(custom) => custom.assign_reference(attribute, target).await,
        }
    }

    fn unknown_attribute(&self, attribute: &str) -> RestorationError {
        RestorationError::UnknownAttribute {
            entity_type: self.entity_type().to_string(),
            attribute: attribute.to_string(),
        }
    }
}

fn expect_memory(attribute: &str, target: &EntityHandle) -> Result<Arc<Memory>, RestorationError> {
    target
        .as_memory()
        .cloned()
        .ok_or_else(|| mismatch(attribute, EntityType::Memory, target))
}

fn expect_agent(attribute: &str, target: &EntityHandle) -> Result<Arc<Agent>, RestorationError> {
    target
        .as_agent()
        .cloned()
        .ok_or_else(|| mismatch(attribute, EntityType::Agent, target))
}

fn mismatch(attribute: &str, expected: EntityType, found: &EntityHandle) -> RestorationError {
    RestorationError::ReferenceTypeMismatch {
        attribute: attribute.to_string(),
        expected: expected.to_string(),
        found: found.entity_type().to_string(),
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityHandle({}/{})", self.entity_type(), self.entity_id())
    }
}

impl From<Arc<Agent>> for EntityHandle {
    fn from(agent: Arc<Agent>) -> Self {
        Self::Agent(agent)
    }
}

impl From<Arc<Memory>> for EntityHandle {
    fn from(memory: Arc<Memory>) -> Self {
        Self::Memory(memory)
    }
}

impl From<Arc<Workflow>> for EntityHandle {
    fn from(workflow: Arc<Workflow>) -> Self {
        Self::Workflow(workflow)
    }
}

impl From<Arc<Task>> for EntityHandle {
    fn from(task: Arc<Task>) -> Self {
        Self::Task(task)
    }
}

/// 可被打检查点的容器：枚举当前所有活动实体
#[async_trait]
pub trait StatefulContainer: Send + Sync {
    async fn list_entities(&self) -> Vec<EntityHandle>;
}

/// 恢复时用来重建实体的工厂；配置里带 id 时必须沿用
#[async_trait]
pub trait EntityFactory: Send + Sync {
    async fn create_agent(&self, config: AgentConfig) -> Result<Arc<Agent>, OrchestratorError>;

    async fn create_memory(&self, config: MemoryConfig) -> Result<Arc<Memory>, OrchestratorError>;

    async fn create_workflow(
        &self,
        config: WorkflowConfig,
    ) -> Result<Arc<Workflow>, OrchestratorError>;

    async fn create_task(&self, config: TaskConfig) -> Result<Arc<Task>, OrchestratorError>;

    /// 登记由自定义恢复器重建的实体；默认不跟踪
    async fn adopt_custom(&self, _entity: Arc<dyn CustomEntity>) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKind;
    use crate::workflow::WorkflowBuilder;

    fn agent(id: &str) -> Arc<Agent> {
        Arc::new(Agent::new(id, AgentConfig::new(id, "reactive"), 10))
    }

    fn memory(id: &str) -> Arc<Memory> {
        Arc::new(Memory::new(id, MemoryKind::ShortTerm))
    }

    #[test]
    fn test_step_agent_attribute() {
        assert_eq!(attr::step_agent("extract"), "steps.extract.agent");
        assert_eq!(attr::parse_step_agent("steps.extract.agent"), Some("extract"));
        assert_eq!(attr::parse_step_agent("steps..agent"), None);
        assert_eq!(attr::parse_step_agent("memory"), None);
    }

    #[tokio::test]
    async fn test_assign_agent_links() {
        let a = agent("a1");
        let m = memory("m1");
        let handle = EntityHandle::from(Arc::clone(&a));

        handle
            .assign_reference(attr::MEMORY, EntityHandle::from(Arc::clone(&m)))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a.memory().await.unwrap(), &m));

        handle
            .assign_reference(attr::TOOLS, EntityHandle::from(agent("helper")))
            .await
            .unwrap();
        assert_eq!(a.tools().await.len(), 1);
    }

    #[tokio::test]
    async fn test_assign_rejects_mismatch_and_unknown() {
        let handle = EntityHandle::from(agent("a1"));
        let err = handle
            .assign_reference(attr::MEMORY, EntityHandle::from(agent("a2")))
            .await
            .unwrap_err();
        assert!(matches!(err, RestorationError::ReferenceTypeMismatch { .. }));

        let err = handle
            .assign_reference("nickname", EntityHandle::from(memory("m1")))
            .await
            .unwrap_err();
        assert!(matches!(err, RestorationError::UnknownAttribute { .. }));
    }

    #[tokio::test]
    async fn test_assign_workflow_step_agent() {
        let config = WorkflowBuilder::new("wf").step("s1", "S1").build().unwrap();
        let wf = Arc::new(Workflow::new("wf1", config).unwrap());
        let a = agent("a1");
        let handle = EntityHandle::from(Arc::clone(&wf));

        handle
            .assign_reference(&attr::step_agent("s1"), EntityHandle::from(Arc::clone(&a)))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&wf.step_agent("s1").await.unwrap(), &a));

        let err = handle
            .assign_reference(&attr::step_agent("ghost"), EntityHandle::from(a))
            .await
            .unwrap_err();
        assert!(matches!(err, RestorationError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_handle_identity() {
        let a = agent("a1");
        let h1 = EntityHandle::from(Arc::clone(&a));
        let h2 = EntityHandle::from(a);
        assert!(h1.ptr_eq(&h2));
        assert!(!h1.ptr_eq(&EntityHandle::from(agent("a1"))));
        assert_eq!(h1.reference(), EntityReference::new(EntityType::Agent, "a1"));
        assert_eq!(format!("{h1:?}"), "EntityHandle(Agent/a1)");
    }
}
