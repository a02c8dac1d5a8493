//! 部署验证工具（kubectl rollout status）— 链路终点

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::{run_checked, run_command};
use crate::tools::registry::{ExecContext, Tool};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(180);

pub struct VerifyTool;

#[async_trait]
impl Tool for VerifyTool {
    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let deployed = args
            .get("_prior")
            .and_then(|p| p.get("deploy_application"))
            .cloned()
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "verify_deployment".into(),
                needs: "deploy_application".into(),
            })?;
        let namespace = deployed
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_string();
        let app_name = deployed
            .get("app_name")
            .and_then(Value::as_str)
            .unwrap_or("app")
            .to_string();

        run_checked(
            "kubectl",
            &[
                "rollout",
                "status",
                &format!("deployment/{app_name}"),
                "-n",
                &namespace,
                "--timeout=120s",
            ],
            None,
            VERIFY_TIMEOUT,
        )
        .await?;

        // pod 概览仅作附加信息，取不到不算失败
        let pods = run_command(
            "kubectl",
            &["get", "pods", "-n", &namespace, "-l", &format!("app={app_name}"), "--no-headers"],
            None,
            VERIFY_TIMEOUT,
        )
        .await
        .map(|o| o.stdout.trim().lines().count())
        .unwrap_or(0);

        Ok(json!({
            "app_name": app_name,
            "namespace": namespace,
            "rollout_complete": true,
            "running_pods": pods,
        }))
    }
}
