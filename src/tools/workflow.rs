//! 工作流级工具：start_workflow 与 workflow_status
//!
//! start_workflow 是 analyze_repository 之上的便捷入口：建会话、
//! 跑首步分析、把分析结果写到规范名下，返回会话 id 与下一步提示。
//! workflow_status 对照推荐步骤顺序汇报进度。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::core::orchestrator::WORKFLOW_STEPS;
use crate::session::SessionManager;
use crate::tools::analyze::AnalyzeTool;
use crate::tools::registry::{ExecContext, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartWorkflowArgs {
    /// 待容器化仓库的路径
    pub repo_path: String,
}

pub struct StartWorkflowTool {
    sessions: Arc<SessionManager>,
}

impl StartWorkflowTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for StartWorkflowTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        match args.get("repo_path").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => Ok(()),
            _ => Err(ToolError::Validation("repo_path is required".into())),
        }
    }

    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let parsed: StartWorkflowArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;
        let root = std::path::PathBuf::from(&parsed.repo_path);

        let analysis = tokio::task::spawn_blocking(move || AnalyzeTool::analyze(&root))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("analysis task failed: {e}")))??;
        let analysis_value = serde_json::to_value(&analysis)
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        // 分析结果写到规范名下，后续步骤的依赖检查才能通过
        self.sessions
            .update(&ctx.session_id, |s| {
                s.set_result("analyze_repository", analysis_value.clone());
                s.mark_step_completed("analyze_repository");
                Ok(())
            })
            .await?;

        Ok(json!({
            "session_id": ctx.session_id,
            "analysis": analysis_value,
            "steps": WORKFLOW_STEPS,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkflowStatusArgs {
    /// 要查询的会话 id
    pub session_id: String,
}

pub struct WorkflowStatusTool {
    sessions: Arc<SessionManager>,
}

impl WorkflowStatusTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for WorkflowStatusTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        match args.get("session_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(ToolError::Validation("session_id is required".into())),
        }
    }

    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let parsed: WorkflowStatusArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;
        let session = self.sessions.get(&parsed.session_id).await?;

        let completed: Vec<&str> = WORKFLOW_STEPS
            .iter()
            .copied()
            .filter(|step| session.completed_steps.iter().any(|s| s == step))
            .collect();
        let next_step = WORKFLOW_STEPS
            .iter()
            .copied()
            .find(|step| !session.completed_steps.iter().any(|s| s == step));
        let percent = (completed.len() * 100) / WORKFLOW_STEPS.len();

        Ok(json!({
            "session_id": session.id,
            "workspace_dir": session.workspace_dir,
            "current_step": session.current_step,
            "completed_steps": completed,
            "next_step": next_step,
            "progress_percent": percent,
            "updated_at": session.updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryStore;

    fn sessions() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_status_reports_progress_and_next_step() {
        let sessions = sessions();
        let session = sessions.create("/repo/foo").await.unwrap();
        sessions
            .update(&session.id, |s| {
                s.mark_step_completed("analyze_repository");
                s.mark_step_completed("generate_dockerfile");
                Ok(())
            })
            .await
            .unwrap();

        let tool = WorkflowStatusTool::new(Arc::clone(&sessions));
        let out = tool
            .execute(
                ExecContext::new(&session.id, "/repo/foo"),
                json!({"session_id": session.id}),
            )
            .await
            .unwrap();

        assert_eq!(out["progress_percent"], json!(20));
        assert_eq!(out["next_step"], json!("build_image"));
        assert_eq!(
            out["completed_steps"],
            json!(["analyze_repository", "generate_dockerfile"])
        );
    }

    #[tokio::test]
    async fn test_status_for_missing_session_is_not_found() {
        let tool = WorkflowStatusTool::new(sessions());
        let err = tool
            .execute(
                ExecContext::new("session_x", "/tmp"),
                json!({"session_id": "session_x"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_workflow_records_analysis_under_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();

        let sessions = sessions();
        let session = sessions.create(dir.path()).await.unwrap();
        let tool = StartWorkflowTool::new(Arc::clone(&sessions));

        let out = tool
            .execute(
                ExecContext::new(&session.id, dir.path()),
                json!({"repo_path": dir.path().to_string_lossy()}),
            )
            .await
            .unwrap();

        assert_eq!(out["session_id"], json!(session.id));
        assert_eq!(out["analysis"]["language"], json!("go"));

        let stored = sessions.get(&session.id).await.unwrap();
        assert!(stored.result("analyze_repository").is_some());
        assert!(stored.completed_steps.contains(&"analyze_repository".to_string()));
    }
}
