//! Kubernetes 清单生成工具
//!
//! 从构建出的镜像渲染 Deployment + Service，写入工作区 k8s/ 目录。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::registry::{ExecContext, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ManifestArgs {
    /// 应用名（默认从镜像名推导）
    #[serde(default)]
    pub app_name: Option<String>,
    /// 容器端口（默认 8080）
    #[serde(default)]
    pub port: Option<u16>,
    /// 副本数（默认 1）
    #[serde(default)]
    pub replicas: Option<u32>,
    /// 命名空间（默认 default）
    #[serde(default)]
    pub namespace: Option<String>,
}

pub struct ManifestTool;

/// DNS-1123 标签：小写字母数字与连字符，不以连字符开头结尾
fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while name.starts_with('-') {
        name.remove(0);
    }
    while name.ends_with('-') {
        name.pop();
    }
    if name.is_empty() {
        "app".to_string()
    } else {
        name.chars().take(63).collect()
    }
}

pub fn render_deployment(app: &str, image: &str, port: u16, replicas: u32, namespace: &str) -> String {
    format!(
        "apiVersion: apps/v1\n\
         kind: Deployment\n\
         metadata:\n\
         \x20 name: {app}\n\
         \x20 namespace: {namespace}\n\
         \x20 labels:\n\
         \x20   app: {app}\n\
         spec:\n\
         \x20 replicas: {replicas}\n\
         \x20 selector:\n\
         \x20   matchLabels:\n\
         \x20     app: {app}\n\
         \x20 template:\n\
         \x20   metadata:\n\
         \x20     labels:\n\
         \x20       app: {app}\n\
         \x20   spec:\n\
         \x20     containers:\n\
         \x20       - name: {app}\n\
         \x20         image: {image}\n\
         \x20         ports:\n\
         \x20           - containerPort: {port}\n"
    )
}

pub fn render_service(app: &str, port: u16, namespace: &str) -> String {
    format!(
        "apiVersion: v1\n\
         kind: Service\n\
         metadata:\n\
         \x20 name: {app}\n\
         \x20 namespace: {namespace}\n\
         spec:\n\
         \x20 selector:\n\
         \x20   app: {app}\n\
         \x20 ports:\n\
         \x20   - port: 80\n\
         \x20     targetPort: {port}\n"
    )
}

#[async_trait]
impl Tool for ManifestTool {
    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let image = args
            .get("_prior")
            .and_then(|p| p.get("build_image"))
            .and_then(|b| b.get("image"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "generate_k8s_manifests".into(),
                needs: "build_image".into(),
            })?;

        // 端口优先取 Dockerfile 步骤探测的值
        let detected_port = args
            .get("_prior")
            .and_then(|p| p.get("generate_dockerfile"))
            .and_then(|d| d.get("port"))
            .and_then(Value::as_u64)
            .map(|p| p as u16);

        let parsed: ManifestArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;

        // 镜像引用去掉 tag 与仓库前缀后作为默认应用名
        let derived = {
            let repo = image.rsplit_once(':').map(|(r, _)| r).unwrap_or(&image);
            repo.rsplit('/').next().unwrap_or("app").to_string()
        };
        let app = sanitize_name(&parsed.app_name.unwrap_or(derived));
        let port = parsed.port.or(detected_port).unwrap_or(8080);
        let replicas = parsed.replicas.unwrap_or(1);
        let namespace = parsed.namespace.unwrap_or_else(|| "default".to_string());

        let out_dir = ctx.workspace_dir.join("k8s");
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("creating k8s dir: {e}")))?;

        let deployment_path = out_dir.join("deployment.yaml");
        let service_path = out_dir.join("service.yaml");
        tokio::fs::write(
            &deployment_path,
            render_deployment(&app, &image, port, replicas, &namespace),
        )
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("writing deployment.yaml: {e}")))?;
        tokio::fs::write(&service_path, render_service(&app, port, &namespace))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("writing service.yaml: {e}")))?;

        Ok(json!({
            "app_name": app,
            "namespace": namespace,
            "manifest_dir": out_dir.to_string_lossy(),
            "files": ["k8s/deployment.yaml", "k8s/service.yaml"],
        }))
    }
}
