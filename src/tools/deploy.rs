//! 应用部署工具（kubectl apply）

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::run_checked;
use crate::tools::registry::{ExecContext, Tool};

const APPLY_TIMEOUT: Duration = Duration::from_secs(120);

pub struct DeployTool;

#[async_trait]
impl Tool for DeployTool {
    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let prior = args.get("_prior").cloned().unwrap_or_default();
        let namespace = prior
            .get("prepare_cluster")
            .and_then(|c| c.get("namespace"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "deploy_application".into(),
                needs: "prepare_cluster".into(),
            })?;
        let manifest_dir = prior
            .get("generate_k8s_manifests")
            .and_then(|m| m.get("manifest_dir"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| ctx.workspace_dir.join("k8s").to_string_lossy().into_owned());
        let app_name = prior
            .get("generate_k8s_manifests")
            .and_then(|m| m.get("app_name"))
            .and_then(Value::as_str)
            .unwrap_or("app")
            .to_string();

        let output = run_checked(
            "kubectl",
            &["apply", "-n", &namespace, "-f", &manifest_dir],
            None,
            APPLY_TIMEOUT,
        )
        .await?;

        Ok(json!({
            "app_name": app_name,
            "namespace": namespace,
            "applied": output.stdout.trim().lines().collect::<Vec<_>>(),
        }))
    }
}
