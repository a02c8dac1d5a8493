//! 会话与注册表查询工具：list_sessions / delete_session / list_tools

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::session::SessionManager;
use crate::tools::registry::{ExecContext, Tool, ToolRegistry};

pub struct ListSessionsTool {
    sessions: Arc<SessionManager>,
}

impl ListSessionsTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for ListSessionsTool {
    async fn execute(&self, _ctx: ExecContext, _args: Value) -> Result<Value, ToolError> {
        let summaries = self.sessions.list().await?;
        Ok(json!({
            "count": summaries.len(),
            "sessions": summaries,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteSessionArgs {
    /// 要删除的会话 id
    pub session_id: String,
}

pub struct DeleteSessionTool {
    sessions: Arc<SessionManager>,
}

impl DeleteSessionTool {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Tool for DeleteSessionTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        match args.get("session_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(ToolError::Validation("session_id is required".into())),
        }
    }

    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let parsed: DeleteSessionArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;
        // 删除幂等：不存在的会话也返回成功
        self.sessions.delete(&parsed.session_id).await?;
        Ok(json!({"deleted": parsed.session_id}))
    }
}

pub struct ListToolsTool {
    registry: Arc<ToolRegistry>,
}

impl ListToolsTool {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for ListToolsTool {
    async fn execute(&self, _ctx: ExecContext, _args: Value) -> Result<Value, ToolError> {
        let tools: Vec<Value> = self
            .registry
            .list()
            .into_iter()
            .map(|meta| {
                json!({
                    "name": meta.name,
                    "description": meta.description,
                    "category": meta.category,
                    "next_tool": meta.next_tool,
                    "required_results": meta.required_results,
                })
            })
            .collect();
        Ok(json!({"count": tools.len(), "tools": tools}))
    }
}
