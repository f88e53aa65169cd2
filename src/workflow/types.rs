//! 工作流类型定义与 Workflow 实体
//!
//! 配置（步骤与依赖）是不可变的纯数据；进度（状态、每步的尝试次数与结果）可变，
//! 检查点同时保存两者，恢复时用配置重建、再套回进度。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::agent::Agent;
use crate::workflow::graph::WorkflowGraph;

pub type WorkflowId = String;
pub type StepId = String;

/// 工作流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// 已创建，等待执行
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// 已暂停（从检查点恢复的运行中工作流也落在这里，等待宿主继续）
    Paused,
}

/// 步骤 / 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// 等待依赖满足
    Waiting,
    /// 依赖已满足，准备执行
    Ready,
    /// 已提交，尚未开始
    Pending,
    Running,
    Completed,
    Failed,
    /// 跳过（条件不满足）
    Skipped,
}

impl TaskState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// 下游依赖是否可视为已满足
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// 单个步骤的定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub id: StepId,
    pub name: String,
    /// AND 依赖：所有前置步骤完成后才可执行
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    /// 失败后最多重试次数
    #[serde(default)]
    pub max_retries: u32,
}

/// 工作流定义（纯数据，检查点中原样保存）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkflowId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepConfig>,
}

impl WorkflowConfig {
    pub fn step(&self, step_id: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// 单步进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub state: TaskState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for StepProgress {
    fn default() -> Self {
        Self {
            state: TaskState::Waiting,
            attempts: 0,
            result: None,
            error: None,
        }
    }
}

/// 工作流进度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub status: WorkflowStatus,
    pub steps: BTreeMap<StepId, StepProgress>,
    /// 毫秒时间戳
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl WorkflowProgress {
    fn new(config: &WorkflowConfig) -> Self {
        Self {
            status: WorkflowStatus::Created,
            steps: config
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepProgress::default()))
                .collect(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// 工作流错误类型
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Step not found: {0}")]
    StepNotFound(String),
    #[error("Cyclic dependency detected")]
    CyclicDependency,
    #[error("Invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Step {step} cannot move from {from:?}")]
    InvalidTransition { step: StepId, from: TaskState },
}

pub struct Workflow {
    id: WorkflowId,
    config: WorkflowConfig,
    graph: WorkflowGraph,
    progress: RwLock<WorkflowProgress>,
    step_agents: RwLock<BTreeMap<StepId, Arc<Agent>>>,
}

impl Workflow {
    /// 校验配置（依赖存在、无环）后创建
    pub fn new(id: impl Into<WorkflowId>, config: WorkflowConfig) -> Result<Self, WorkflowError> {
        let id = id.into();
        let graph = WorkflowGraph::new(&config.steps)?;
        let config = WorkflowConfig {
            id: Some(id.clone()),
            ..config
        };
        let progress = WorkflowProgress::new(&config);
        Ok(Self {
            id,
            config,
            graph,
            progress: RwLock::new(progress),
            step_agents: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub async fn status(&self) -> WorkflowStatus {
        self.progress.read().await.status
    }

    pub async fn progress(&self) -> WorkflowProgress {
        self.progress.read().await.clone()
    }

    pub async fn step(&self, step_id: &str) -> Option<StepProgress> {
        self.progress.read().await.steps.get(step_id).cloned()
    }

    /// 可以执行的步骤（依赖已满足且尚未开始），按定义顺序
    pub async fn ready_steps(&self) -> Vec<StepId> {
        self.graph.ready_steps(&self.progress.read().await.steps)
    }

    /// 开始（或从暂停继续）执行，刷新就绪步骤
    pub async fn start(&self) {
        let mut progress = self.progress.write().await;
        if progress.started_at.is_none() {
            progress.started_at = Some(chrono::Utc::now().timestamp_millis());
        }
        progress.status = WorkflowStatus::Running;
        self.refresh_ready(&mut progress);
    }

    pub async fn pause(&self) {
        let mut progress = self.progress.write().await;
        if progress.status == WorkflowStatus::Running {
            progress.status = WorkflowStatus::Paused;
        }
    }

    pub async fn mark_step_running(&self, step_id: &str) -> Result<(), WorkflowError> {
        let mut progress = self.progress.write().await;
        let step = step_mut(&mut progress, step_id)?;
        if !matches!(step.state, TaskState::Ready | TaskState::Pending) {
            return Err(WorkflowError::InvalidTransition {
                step: step_id.to_string(),
                from: step.state,
            });
        }
        step.state = TaskState::Running;
        step.attempts += 1;
        Ok(())
    }

    pub async fn complete_step(&self, step_id: &str, result: Value) -> Result<(), WorkflowError> {
        let mut progress = self.progress.write().await;
        let step = step_mut(&mut progress, step_id)?;
        if step.state != TaskState::Running {
            return Err(WorkflowError::InvalidTransition {
                step: step_id.to_string(),
                from: step.state,
            });
        }
        step.state = TaskState::Completed;
        step.result = Some(result);
        step.error = None;
        self.refresh_ready(&mut progress);
        self.check_completion(&mut progress);
        Ok(())
    }

    /// 步骤失败：未超出重试上限时回到 Ready，否则整个工作流失败
    pub async fn fail_step(&self, step_id: &str, error: impl Into<String>) -> Result<(), WorkflowError> {
        let max_retries = self
            .config
            .step(step_id)
            .map(|s| s.max_retries)
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.to_string()))?;
        let mut progress = self.progress.write().await;
        let step = step_mut(&mut progress, step_id)?;
        if step.state != TaskState::Running {
            return Err(WorkflowError::InvalidTransition {
                step: step_id.to_string(),
                from: step.state,
            });
        }
        step.error = Some(error.into());
        if step.attempts <= max_retries {
            step.state = TaskState::Ready;
        } else {
            step.state = TaskState::Failed;
            progress.status = WorkflowStatus::Failed;
            progress.completed_at = Some(chrono::Utc::now().timestamp_millis());
        }
        Ok(())
    }

    /// 套用检查点中的进度：中断的步骤回到 Ready（重新执行，保留尝试次数），
    /// 运行中的工作流转为 Paused，等待宿主调用 start 继续
    pub async fn restore_progress(&self, saved: WorkflowProgress) {
        let mut progress = self.progress.write().await;
        for (step_id, mut step) in saved.steps {
            if !progress.steps.contains_key(&step_id) {
                tracing::warn!(workflow = %self.id, step = %step_id, "checkpointed step no longer exists, ignoring");
                continue;
            }
            if step.state == TaskState::Running {
                step.state = TaskState::Ready;
            }
            progress.steps.insert(step_id, step);
        }
        progress.status = match saved.status {
            WorkflowStatus::Running => WorkflowStatus::Paused,
            other => other,
        };
        progress.started_at = saved.started_at;
        progress.completed_at = saved.completed_at;
    }

    pub async fn assign_agent(&self, step_id: &str, agent: Arc<Agent>) -> Result<(), WorkflowError> {
        if self.config.step(step_id).is_none() {
            return Err(WorkflowError::StepNotFound(step_id.to_string()));
        }
        self.step_agents.write().await.insert(step_id.to_string(), agent);
        Ok(())
    }

    pub async fn step_agent(&self, step_id: &str) -> Option<Arc<Agent>> {
        self.step_agents.read().await.get(step_id).cloned()
    }

    pub async fn step_agents(&self) -> Vec<(StepId, Arc<Agent>)> {
        self.step_agents
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    fn refresh_ready(&self, progress: &mut WorkflowProgress) {
        for step_id in self.graph.ready_steps(&progress.steps) {
            if let Some(step) = progress.steps.get_mut(&step_id) {
                if step.state == TaskState::Waiting {
                    step.state = TaskState::Ready;
                }
            }
        }
    }

    fn check_completion(&self, progress: &mut WorkflowProgress) {
        let all_finished = progress.steps.values().all(|s| s.state.is_finished());
        if all_finished {
            let all_success = progress.steps.values().all(|s| s.state.satisfies_dependents());
            progress.status = if all_success {
                WorkflowStatus::Completed
            } else {
                WorkflowStatus::Failed
            };
            progress.completed_at = Some(chrono::Utc::now().timestamp_millis());
        }
    }
}

fn step_mut<'a>(
    progress: &'a mut WorkflowProgress,
    step_id: &str,
) -> Result<&'a mut StepProgress, WorkflowError> {
    progress
        .steps
        .get_mut(step_id)
        .ok_or_else(|| WorkflowError::StepNotFound(step_id.to_string()))
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowBuilder;
    use serde_json::json;

    fn two_step() -> Workflow {
        let config = WorkflowBuilder::new("Plan")
            .step("extract", "Extract categories")
            .step("map", "Map compliance")
            .sequential("extract", "map")
            .max_retries("map", 1)
            .build()
            .unwrap();
        Workflow::new("wf1", config).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_progress() {
        let wf = two_step();
        assert_eq!(wf.status().await, WorkflowStatus::Created);
        wf.start().await;
        assert_eq!(wf.ready_steps().await, vec!["extract"]);

        wf.mark_step_running("extract").await.unwrap();
        wf.complete_step("extract", json!(["a", "b"])).await.unwrap();
        assert_eq!(wf.step("map").await.unwrap().state, TaskState::Ready);

        wf.mark_step_running("map").await.unwrap();
        wf.complete_step("map", json!({})).await.unwrap();
        assert_eq!(wf.status().await, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn test_retry_then_fail() {
        let wf = two_step();
        wf.start().await;
        wf.mark_step_running("extract").await.unwrap();
        wf.complete_step("extract", json!(null)).await.unwrap();

        wf.mark_step_running("map").await.unwrap();
        wf.fail_step("map", "timeout").await.unwrap();
        assert_eq!(wf.step("map").await.unwrap().state, TaskState::Ready);

        wf.mark_step_running("map").await.unwrap();
        wf.fail_step("map", "timeout").await.unwrap();
        assert_eq!(wf.step("map").await.unwrap().state, TaskState::Failed);
        assert_eq!(wf.status().await, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_invalid_transition() {
        let wf = two_step();
        let err = wf.complete_step("extract", json!(1)).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
        assert!(matches!(
            wf.mark_step_running("nope").await,
            Err(WorkflowError::StepNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_progress_resets_in_flight_step() {
        let wf = two_step();
        wf.start().await;
        wf.mark_step_running("extract").await.unwrap();
        let saved = wf.progress().await;

        let restored = two_step();
        restored.restore_progress(saved).await;
        assert_eq!(restored.status().await, WorkflowStatus::Paused);
        let step = restored.step("extract").await.unwrap();
        assert_eq!(step.state, TaskState::Ready);
        assert_eq!(step.attempts, 1);
        assert_eq!(restored.ready_steps().await, vec!["extract"]);
    }
}
