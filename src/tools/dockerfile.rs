//! Dockerfile 生成工具
//!
//! 按分析结果里的语言选模板，渲染多阶段 Dockerfile 并写入仓库。
//! 仓库里已有 Dockerfile 时默认不覆盖（overwrite 参数可强制）。

use std::path::Path;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::error::ToolError;
use crate::tools::analyze::Analysis;
use crate::tools::registry::{ExecContext, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DockerfileArgs {
    /// 基础镜像覆盖（默认按语言选择）
    #[serde(default)]
    pub base_image: Option<String>,
    /// 已存在 Dockerfile 时是否覆盖
    #[serde(default)]
    pub overwrite: bool,
}

pub struct DockerfileTool;

impl DockerfileTool {
    /// 渲染 Dockerfile 文本
    pub fn render(analysis: &Analysis, base_image: Option<&str>) -> Result<String, ToolError> {
        let port = analysis.port;
        let content = match analysis.language.as_str() {
            "rust" => {
                let base = base_image.unwrap_or("rust:1.79-slim");
                match analysis.package_name.as_deref() {
                    // 包名已知：只拷贝对应二进制，exec 形式启动
                    Some(bin) => format!(
                        "FROM {base} AS builder\n\
                         WORKDIR /app\n\
                         COPY . .\n\
                         RUN cargo build --release\n\
                         \n\
                         FROM debian:bookworm-slim\n\
                         WORKDIR /app\n\
                         COPY --from=builder /app/target/release/{bin} /app/{bin}\n\
                         EXPOSE {port}\n\
                         CMD [\"/app/{bin}\"]\n"
                    ),
                    // 包名未知：shell 形式 CMD，启动时展开替换
                    None => format!(
                        "FROM {base} AS builder\n\
                         WORKDIR /app\n\
                         COPY . .\n\
                         RUN cargo build --release\n\
                         \n\
                         FROM debian:bookworm-slim\n\
                         WORKDIR /app\n\
                         COPY --from=builder /app/target/release/ /app/\n\
                         EXPOSE {port}\n\
                         CMD /app/$(ls -1 /app | head -n 1)\n"
                    ),
                }
            }
            "go" => {
                let base = base_image.unwrap_or("golang:1.22-alpine");
                format!(
                    "FROM {base} AS builder\n\
                     WORKDIR /app\n\
                     COPY go.mod go.sum* ./\n\
                     RUN go mod download\n\
                     COPY . .\n\
                     RUN CGO_ENABLED=0 go build -o /server .\n\
                     \n\
                     FROM alpine:3.20\n\
                     COPY --from=builder /server /server\n\
                     EXPOSE {port}\n\
                     ENTRYPOINT [\"/server\"]\n"
                )
            }
            "javascript" => {
                let base = base_image.unwrap_or("node:20-alpine");
                format!(
                    "FROM {base}\n\
                     WORKDIR /app\n\
                     COPY package*.json ./\n\
                     RUN npm ci --omit=dev\n\
                     COPY . .\n\
                     EXPOSE {port}\n\
                     CMD [\"npm\", \"start\"]\n"
                )
            }
            "python" => {
                let base = base_image.unwrap_or("python:3.12-slim");
                format!(
                    "FROM {base}\n\
                     WORKDIR /app\n\
                     COPY requirements.txt* pyproject.toml* ./\n\
                     RUN pip install --no-cache-dir -r requirements.txt || pip install --no-cache-dir .\n\
                     COPY . .\n\
                     EXPOSE {port}\n\
                     CMD [\"python\", \"-m\", \"app\"]\n"
                )
            }
            "java" => {
                let base = base_image.unwrap_or("eclipse-temurin:21-jre");
                format!(
                    "FROM maven:3.9-eclipse-temurin-21 AS builder\n\
                     WORKDIR /app\n\
                     COPY . .\n\
                     RUN mvn -q package -DskipTests\n\
                     \n\
                     FROM {base}\n\
                     COPY --from=builder /app/target/*.jar /app.jar\n\
                     EXPOSE {port}\n\
                     ENTRYPOINT [\"java\", \"-jar\", \"/app.jar\"]\n"
                )
            }
            other => {
                return Err(ToolError::ExecutionFailed(format!(
                    "no Dockerfile template for language '{other}'"
                )))
            }
        };
        Ok(content)
    }
}

fn prior_analysis(args: &Value) -> Result<Analysis, ToolError> {
    let prior = args
        .get("_prior")
        .and_then(|p| p.get("analyze_repository"))
        .cloned()
        .ok_or_else(|| ToolError::MissingDependency {
            tool: "generate_dockerfile".into(),
            needs: "analyze_repository".into(),
        })?;
    serde_json::from_value(prior).map_err(|e| ToolError::Schema(e.to_string()))
}

#[async_trait]
impl Tool for DockerfileTool {
    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let analysis = prior_analysis(&args)?;
        let parsed: DockerfileArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::Validation(e.to_string()))?;

        let path = ctx.workspace_dir.join("Dockerfile");
        if path.exists() && !parsed.overwrite {
            // 不覆盖用户已有的 Dockerfile，直接采用它
            let existing = read_existing(&path)?;
            return Ok(json!({
                "path": path.to_string_lossy(),
                "content": existing,
                "generated": false,
                "port": analysis.port,
            }));
        }

        let content = Self::render(&analysis, parsed.base_image.as_deref())?;
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("writing Dockerfile: {e}")))?;

        Ok(json!({
            "path": path.to_string_lossy(),
            "content": content,
            "generated": true,
            "port": analysis.port,
        }))
    }
}

fn read_existing(path: &Path) -> Result<String, ToolError> {
    std::fs::read_to_string(path)
        .map_err(|e| ToolError::ExecutionFailed(format!("reading existing Dockerfile: {e}")))
}
