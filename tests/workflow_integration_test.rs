//! 工作流集成测试：执行到一半打检查点，在新实例中恢复后继续执行

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive::agent::AgentConfig;
    use hive::config::AppConfig;
    use hive::core::Orchestrator;
    use hive::state::InMemoryStorage;
    use hive::workflow::*;
    use serde_json::json;

    fn orchestrator(storage: Arc<InMemoryStorage>) -> Orchestrator {
        Orchestrator::builder(AppConfig::default())
            .storage(storage)
            .build()
            .unwrap()
    }

    fn plan() -> WorkflowConfig {
        WorkflowBuilder::new("Taxonomy plan")
            .id("plan")
            .step("a", "Extract categories")
            .step("b", "Map compliance")
            .step("c", "Write report")
            .sequential("a", "b")
            .sequential("b", "c")
            .max_retries("b", 2)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_resume_interrupted_workflow() {
        let storage = Arc::new(InMemoryStorage::new());
        let first = orchestrator(storage.clone());
        let worker = first
            .create_agent(AgentConfig::new("Worker", "reactive").with_id("worker"))
            .await
            .unwrap();
        let workflow = first.create_workflow(plan()).await.unwrap();
        workflow.assign_agent("b", Arc::clone(&worker)).await.unwrap();

        workflow.start().await;
        workflow.mark_step_running("a").await.unwrap();
        workflow.complete_step("a", json!(["pii"])).await.unwrap();
        workflow.mark_step_running("b").await.unwrap();
        first.create_checkpoint(Some("mid-run"), None).await.unwrap();

        let second = orchestrator(storage);
        let report = second.resume_from_checkpoint("mid-run").await.unwrap();
        assert!(report.is_complete());

        let restored = second.workflow("plan").await.unwrap();
        assert_eq!(restored.status().await, WorkflowStatus::Paused);
        assert_eq!(restored.step("a").await.unwrap().result, Some(json!(["pii"])));
        let b = restored.step("b").await.unwrap();
        assert_eq!(b.state, TaskState::Ready);
        assert_eq!(b.attempts, 1);
        assert_eq!(restored.ready_steps().await, vec!["b"]);
        assert!(Arc::ptr_eq(
            &restored.step_agent("b").await.unwrap(),
            &second.agent("worker").await.unwrap()
        ));

        // 从恢复点继续执行到结束
        restored.start().await;
        for step in ["b", "c"] {
            restored.mark_step_running(step).await.unwrap();
            restored.complete_step(step, json!(null)).await.unwrap();
        }
        assert_eq!(restored.status().await, WorkflowStatus::Completed);
        assert_eq!(restored.step("b").await.unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_resume_task_with_agent() {
        let storage = Arc::new(InMemoryStorage::new());
        let first = orchestrator(storage.clone());
        let agent = first
            .create_agent(AgentConfig::new("Classifier", "reactive"))
            .await
            .unwrap();
        let done = first
            .create_task(TaskConfig::new("classify batch 1").with_input(json!({"batch": 1})))
            .await
            .unwrap();
        done.start().await.unwrap();
        done.complete(json!("ok")).await.unwrap();
        let running = first
            .create_task(TaskConfig::new("classify batch 2").with_max_retries(1))
            .await
            .unwrap();
        running.set_agent(Some(Arc::clone(&agent))).await;
        running.start().await.unwrap();
        first.create_checkpoint(None, None).await.unwrap();

        let second = orchestrator(storage);
        second.resume_latest_checkpoint().await.unwrap();

        let restored_done = second.task(done.id()).await.unwrap();
        assert_eq!(restored_done.state().await, TaskState::Completed);
        assert_eq!(restored_done.config().input, json!({"batch": 1}));

        let restored_running = second.task(running.id()).await.unwrap();
        assert_eq!(restored_running.state().await, TaskState::Pending);
        assert_eq!(restored_running.progress().await.attempts, 1);
        assert!(Arc::ptr_eq(
            &restored_running.agent().await.unwrap(),
            &second.agent(agent.id()).await.unwrap()
        ));
        restored_running.start().await.unwrap();
    }
}
