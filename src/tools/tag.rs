//! 镜像打标工具（docker tag）

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::run_checked;
use crate::tools::registry::{ExecContext, Tool};

const TAG_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TagArgs {
    /// 目标引用，如 registry.example.com/team/app:v1.2.3
    pub target: String,
}

pub struct TagTool;

#[async_trait]
impl Tool for TagTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let target = args
            .get("target")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Validation("target is required".into()))?;
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ToolError::Validation(format!(
                "invalid target reference '{target}'"
            )));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let source = args
            .get("_prior")
            .and_then(|p| p.get("build_image"))
            .and_then(|b| b.get("image"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "tag_image".into(),
                needs: "build_image".into(),
            })?;
        let parsed: TagArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;

        run_checked("docker", &["tag", &source, &parsed.target], None, TAG_TIMEOUT).await?;

        Ok(json!({
            "source": source,
            "target": parsed.target,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_target() {
        let tool = TagTool;
        assert!(tool.validate(&json!({})).is_err());
        assert!(tool.validate(&json!({"target": "has space"})).is_err());
        assert!(tool
            .validate(&json!({"target": "registry.local/app:v1"}))
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_build_result_fails_fast() {
        let ctx = ExecContext::new("session_t", "/tmp");
        let err = TagTool
            .execute(ctx, json!({"target": "registry.local/app:v1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MissingDependency { .. }));
    }
}
