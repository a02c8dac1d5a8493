//! 集群准备工具（kubectl）
//!
//! 连通性检查 + 目标命名空间确保存在。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::{run_checked, run_command};
use crate::tools::registry::{ExecContext, Tool};

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ClusterTool;

#[async_trait]
impl Tool for ClusterTool {
    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let namespace = args
            .get("_prior")
            .and_then(|p| p.get("generate_k8s_manifests"))
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "prepare_cluster".into(),
                needs: "generate_k8s_manifests".into(),
            })?;

        // 集群可达性
        run_checked("kubectl", &["cluster-info"], None, KUBECTL_TIMEOUT).await?;

        // 命名空间存在性；缺失则创建
        let exists = run_command(
            "kubectl",
            &["get", "namespace", &namespace],
            None,
            KUBECTL_TIMEOUT,
        )
        .await?
        .success();
        if !exists {
            run_checked(
                "kubectl",
                &["create", "namespace", &namespace],
                None,
                KUBECTL_TIMEOUT,
            )
            .await?;
        }

        Ok(json!({
            "namespace": namespace,
            "namespace_created": !exists,
            "cluster_reachable": true,
        }))
    }
}
