//! Task 实体：独立于工作流的单个任务，可链接一个执行它的 Agent

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::Agent;
use crate::workflow::types::{StepProgress, TaskState, WorkflowError};

/// 任务进度与工作流步骤进度同构
pub type TaskProgress = StepProgress;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub max_retries: u32,
}

impl TaskConfig {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            input: Value::Null,
            max_retries: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

pub struct Task {
    id: String,
    config: TaskConfig,
    progress: RwLock<TaskProgress>,
    agent: RwLock<Option<Arc<Agent>>>,
}

impl Task {
    pub fn new(id: impl Into<String>, config: TaskConfig) -> Self {
        let id = id.into();
        let config = TaskConfig {
            id: Some(id.clone()),
            ..config
        };
        Self {
            id,
            config,
            progress: RwLock::new(TaskProgress {
                state: TaskState::Pending,
                ..TaskProgress::default()
            }),
            agent: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub async fn state(&self) -> TaskState {
        self.progress.read().await.state
    }

    pub async fn progress(&self) -> TaskProgress {
        self.progress.read().await.clone()
    }

    pub async fn start(&self) -> Result<(), WorkflowError> {
        let mut progress = self.progress.write().await;
        if !matches!(
            progress.state,
            TaskState::Waiting | TaskState::Ready | TaskState::Pending
        ) {
            return Err(self.invalid(progress.state));
        }
        progress.state = TaskState::Running;
        progress.attempts += 1;
        Ok(())
    }

    pub async fn complete(&self, result: Value) -> Result<(), WorkflowError> {
        let mut progress = self.progress.write().await;
        if progress.state != TaskState::Running {
            return Err(self.invalid(progress.state));
        }
        progress.state = TaskState::Completed;
        progress.result = Some(result);
        progress.error = None;
        Ok(())
    }

    /// 失败：未超出重试上限时回到 Pending
    pub async fn fail(&self, error: impl Into<String>) -> Result<(), WorkflowError> {
        let mut progress = self.progress.write().await;
        if progress.state != TaskState::Running {
            return Err(self.invalid(progress.state));
        }
        progress.error = Some(error.into());
        progress.state = if progress.attempts <= self.config.max_retries {
            TaskState::Pending
        } else {
            TaskState::Failed
        };
        Ok(())
    }

    /// 套用检查点进度；执行中断的任务回到 Pending 重新执行
    pub async fn restore_progress(&self, mut saved: TaskProgress) {
        if saved.state == TaskState::Running {
            saved.state = TaskState::Pending;
        }
        *self.progress.write().await = saved;
    }

    pub async fn agent(&self) -> Option<Arc<Agent>> {
        self.agent.read().await.clone()
    }

    pub async fn set_agent(&self, agent: Option<Arc<Agent>>) {
        *self.agent.write().await = agent;
    }

    fn invalid(&self, from: TaskState) -> WorkflowError {
        WorkflowError::InvalidTransition {
            step: self.id.clone(),
            from,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("description", &self.config.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_task_lifecycle_with_retry() {
        let task = Task::new("t1", TaskConfig::new("classify").with_max_retries(1));
        assert_eq!(task.state().await, TaskState::Pending);

        task.start().await.unwrap();
        task.fail("rate limited").await.unwrap();
        assert_eq!(task.state().await, TaskState::Pending);

        task.start().await.unwrap();
        task.complete(json!({"label": "pii"})).await.unwrap();
        let progress = task.progress().await;
        assert_eq!(progress.state, TaskState::Completed);
        assert_eq!(progress.attempts, 2);
        assert_eq!(progress.error, None);
        assert!(task.start().await.is_err());
    }

    #[tokio::test]
    async fn test_restore_resets_running() {
        let task = Task::new("t1", TaskConfig::new("classify"));
        task.start().await.unwrap();
        let saved = task.progress().await;

        let restored = Task::new("t1", TaskConfig::new("classify"));
        restored.restore_progress(saved).await;
        let progress = restored.progress().await;
        assert_eq!(progress.state, TaskState::Pending);
        assert_eq!(progress.attempts, 1);
    }
}
