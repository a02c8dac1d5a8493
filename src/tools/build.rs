//! 镜像构建工具（docker build）

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::command::run_checked;
use crate::tools::registry::{ExecContext, Tool};

const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BuildArgs {
    /// 镜像名（不含 tag），默认用工作目录名
    #[serde(default)]
    pub image_name: Option<String>,
    /// 镜像 tag，默认 latest
    #[serde(default)]
    pub tag: Option<String>,
    /// 跳过构建缓存
    #[serde(default)]
    pub no_cache: bool,
}

pub struct BuildTool;

/// 镜像名合法性：小写字母数字与 ./-_，不以分隔符开头
fn valid_image_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "./-_".contains(c))
        && !name.starts_with(['.', '-', '_', '/'])
}

#[async_trait]
impl Tool for BuildTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        if let Some(name) = args.get("image_name").and_then(Value::as_str) {
            if !valid_image_name(name) {
                return Err(ToolError::Validation(format!(
                    "invalid image name '{name}'"
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let dockerfile_path = args
            .get("_prior")
            .and_then(|p| p.get("generate_dockerfile"))
            .and_then(|d| d.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingDependency {
                tool: "build_image".into(),
                needs: "generate_dockerfile".into(),
            })?;

        let parsed: BuildArgs =
            serde_json::from_value(args).map_err(|e| ToolError::Validation(e.to_string()))?;

        let image_name = parsed.image_name.unwrap_or_else(|| {
            ctx.workspace_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "app".to_string())
        });
        let tag = parsed.tag.unwrap_or_else(|| "latest".to_string());
        let image = format!("{image_name}:{tag}");

        let workspace = ctx.workspace_dir.to_string_lossy().into_owned();
        let mut cmd_args = vec!["build", "-t", &image, "-f", &dockerfile_path];
        if parsed.no_cache {
            cmd_args.push("--no-cache");
        }
        cmd_args.push(&workspace);

        let output = run_checked("docker", &cmd_args, Some(&ctx.workspace_dir), BUILD_TIMEOUT)
            .await?;

        // 镜像 ID：docker build 末行的 sha 摘要（没有也不算失败）
        let image_id = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .rev()
            .find_map(|line| {
                line.split_whitespace()
                    .find(|tok| tok.starts_with("sha256:"))
                    .map(str::to_string)
            });

        Ok(json!({
            "image": image,
            "image_id": image_id,
            "dockerfile": dockerfile_path,
        }))
    }
}
