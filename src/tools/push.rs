//! 镜像推送工具（docker push）

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::run_checked;
use crate::tools::registry::{ExecContext, Tool};

const PUSH_TIMEOUT: Duration = Duration::from_secs(600);

pub struct PushTool;

#[async_trait]
impl Tool for PushTool {
    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let target = args
            .get("_prior")
            .and_then(|p| p.get("tag_image"))
            .and_then(|t| t.get("target"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "push_image".into(),
                needs: "tag_image".into(),
            })?;

        let output = run_checked("docker", &["push", &target], None, PUSH_TIMEOUT).await?;

        // push 输出末行带 digest: sha256:...
        let digest = output
            .stdout
            .lines()
            .rev()
            .find_map(|line| {
                line.split_whitespace()
                    .find(|tok| tok.starts_with("sha256:"))
                    .map(str::to_string)
            });

        Ok(json!({
            "image": target,
            "digest": digest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tag_result_fails_fast() {
        let ctx = ExecContext::new("session_t", "/tmp");
        let err = PushTool.execute(ctx, json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::MissingDependency { ref needs, .. } if needs == "tag_image"
        ));
    }
}
