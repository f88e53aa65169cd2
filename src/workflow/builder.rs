//! 工作流构建器
//!
//! 流式 API 构建 `WorkflowConfig`；build 时用依赖图校验。

use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::*;

pub struct WorkflowBuilder {
    id: Option<WorkflowId>,
    name: String,
    description: Option<String>,
    steps: Vec<StepConfig>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// 添加步骤
    pub fn step(mut self, id: impl Into<StepId>, name: impl Into<String>) -> Self {
        self.steps.push(StepConfig {
            id: id.into(),
            name: name.into(),
            depends_on: Vec::new(),
            max_retries: 0,
        });
        self
    }

    /// 顺序依赖：to 在 from 之后执行
    pub fn sequential(self, from: impl Into<StepId>, to: impl Into<StepId>) -> Self {
        let from = from.into();
        self.depends_on_all(to, vec![from])
    }

    /// AND 依赖（追加）
    pub fn depends_on_all(mut self, step_id: impl Into<StepId>, deps: Vec<StepId>) -> Self {
        let id = step_id.into();
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            for dep in deps {
                if !step.depends_on.contains(&dep) {
                    step.depends_on.push(dep);
                }
            }
        }
        self
    }

    pub fn max_retries(mut self, step_id: impl Into<StepId>, retries: u32) -> Self {
        let id = step_id.into();
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            step.max_retries = retries;
        }
        self
    }

    pub fn build(self) -> Result<WorkflowConfig, WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidConfiguration(
                "workflow needs at least one step".to_string(),
            ));
        }
        WorkflowGraph::new(&self.steps)?;
        Ok(WorkflowConfig {
            id: self.id,
            name: self.name,
            description: self.description,
            steps: self.steps,
        })
    }
}
