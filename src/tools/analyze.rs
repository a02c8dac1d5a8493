//! 仓库分析工具（链路起点）
//!
//! 扫描仓库目录，探测语言、框架、监听端口与构建文件，
//! 结果写入会话供 generate_dockerfile 等后续步骤消费。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::core::error::ToolError;
use crate::tools::registry::{ExecContext, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeArgs {
    /// 待分析仓库的路径
    pub repo_path: String,
}

/// 分析结果（后续工具从 _prior 读取）
#[derive(Debug, Serialize, Deserialize)]
pub struct Analysis {
    pub language: String,
    pub framework: Option<String>,
    /// 清单声明的包名（rust: Cargo.toml [package].name，产物二进制名用）
    #[serde(default)]
    pub package_name: Option<String>,
    pub port: u16,
    pub build_files: Vec<String>,
    pub has_dockerfile: bool,
}

pub struct AnalyzeTool;

/// 语言判定用的标志文件，按优先级排列
const LANGUAGE_MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("go.mod", "go"),
    ("pom.xml", "java"),
    ("build.gradle", "java"),
    ("build.gradle.kts", "java"),
    ("package.json", "javascript"),
    ("pyproject.toml", "python"),
    ("requirements.txt", "python"),
];

/// (语言, 依赖关键字, 框架名, 默认端口)
const FRAMEWORK_MARKERS: &[(&str, &str, &str, u16)] = &[
    ("rust", "axum", "axum", 3000),
    ("rust", "actix-web", "actix-web", 8080),
    ("rust", "rocket", "rocket", 8000),
    ("go", "github.com/gin-gonic/gin", "gin", 8080),
    ("go", "github.com/labstack/echo", "echo", 8080),
    ("javascript", "\"next\"", "nextjs", 3000),
    ("javascript", "\"express\"", "express", 3000),
    ("javascript", "\"fastify\"", "fastify", 3000),
    ("python", "fastapi", "fastapi", 8000),
    ("python", "flask", "flask", 5000),
    ("python", "django", "django", 8000),
    ("java", "spring-boot", "spring-boot", 8080),
];

impl AnalyzeTool {
    fn detect_language(root: &Path) -> Option<(String, PathBuf)> {
        for (marker, language) in LANGUAGE_MARKERS {
            let candidate = root.join(marker);
            if candidate.is_file() {
                return Some((language.to_string(), candidate));
            }
        }
        // .csproj 没有固定文件名，用 glob 找
        let pattern = root.join("*.csproj");
        if let Ok(mut matches) = glob::glob(&pattern.to_string_lossy()) {
            if let Some(Ok(path)) = matches.next() {
                return Some(("dotnet".to_string(), path));
            }
        }
        None
    }

    fn detect_package_name(language: &str, manifest: &str) -> Option<String> {
        if language != "rust" {
            return None;
        }
        let name_re = Regex::new(r#"(?m)^\s*name\s*=\s*"([^"]+)""#).expect("static regex");
        name_re.captures(manifest).map(|caps| caps[1].to_string())
    }

    fn detect_framework(language: &str, manifest: &str) -> Option<(String, u16)> {
        FRAMEWORK_MARKERS
            .iter()
            .find(|(lang, needle, _, _)| *lang == language && manifest.contains(needle))
            .map(|(_, _, framework, port)| (framework.to_string(), *port))
    }

    /// 端口来源优先级：既有 Dockerfile 的 EXPOSE > 源码里的监听端口 > 框架默认
    fn detect_port(root: &Path, fallback: u16) -> u16 {
        let dockerfile = root.join("Dockerfile");
        if let Ok(content) = std::fs::read_to_string(&dockerfile) {
            if let Some(port) = Self::scan_expose(&content) {
                return port;
            }
        }

        let listen_re = Regex::new(r"(?i)(?:listen|port|bind)\D{0,20}?(\d{4,5})")
            .expect("static regex");
        for entry in WalkDir::new(root)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| e.file_name() != "node_modules" && e.file_name() != "target")
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let is_source = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| matches!(ext, "rs" | "go" | "js" | "ts" | "py" | "java" | "toml" | "yaml" | "env"))
                .unwrap_or(false);
            if !is_source {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                for caps in listen_re.captures_iter(&content) {
                    if let Ok(port) = caps[1].parse::<u16>() {
                        if (1024..=65535).contains(&(port as u32)) {
                            return port;
                        }
                    }
                }
            }
        }
        fallback
    }

    fn scan_expose(dockerfile: &str) -> Option<u16> {
        let expose_re = Regex::new(r"(?im)^\s*EXPOSE\s+(\d+)").expect("static regex");
        expose_re
            .captures(dockerfile)
            .and_then(|caps| caps[1].parse().ok())
    }

    fn collect_build_files(root: &Path) -> Vec<String> {
        let names: BTreeSet<&str> = [
            "Cargo.toml",
            "Cargo.lock",
            "go.mod",
            "go.sum",
            "package.json",
            "package-lock.json",
            "yarn.lock",
            "pom.xml",
            "build.gradle",
            "build.gradle.kts",
            "requirements.txt",
            "pyproject.toml",
            "Makefile",
            "Dockerfile",
        ]
        .into_iter()
        .collect();

        let mut found = Vec::new();
        for entry in WalkDir::new(root)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| e.file_name() != "node_modules" && e.file_name() != "target")
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            if let Some(name) = entry.file_name().to_str() {
                if names.contains(name) || name.ends_with(".csproj") {
                    if let Ok(rel) = entry.path().strip_prefix(root) {
                        found.push(rel.to_string_lossy().into_owned());
                    }
                }
            }
        }
        found.sort();
        found
    }

    pub fn analyze(root: &Path) -> Result<Analysis, ToolError> {
        if !root.is_dir() {
            return Err(ToolError::Validation(format!(
                "repo_path '{}' is not a directory",
                root.display()
            )));
        }

        let (language, manifest_path) = Self::detect_language(root).ok_or_else(|| {
            ToolError::ExecutionFailed(format!(
                "could not detect a supported language in '{}'",
                root.display()
            ))
        })?;

        let manifest = std::fs::read_to_string(&manifest_path).unwrap_or_default();
        let framework = Self::detect_framework(&language, &manifest);
        let default_port = framework.as_ref().map(|(_, p)| *p).unwrap_or(8080);
        let port = Self::detect_port(root, default_port);

        Ok(Analysis {
            package_name: Self::detect_package_name(&language, &manifest),
            language,
            framework: framework.map(|(name, _)| name),
            port,
            build_files: Self::collect_build_files(root),
            has_dockerfile: root.join("Dockerfile").is_file(),
        })
    }
}

#[async_trait]
impl Tool for AnalyzeTool {
    fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let repo_path = args
            .get("repo_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Validation("repo_path is required".into()))?;
        if repo_path.is_empty() {
            return Err(ToolError::Validation("repo_path must not be empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
        let args: AnalyzeArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::Validation(e.to_string()))?;
        let root = PathBuf::from(&args.repo_path);

        // 文件系统扫描是阻塞的，放到阻塞线程
        let analysis = tokio::task::spawn_blocking(move || AnalyzeTool::analyze(&root))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("analysis task failed: {e}")))??;

        serde_json::to_value(&analysis).map_err(|e| ToolError::ExecutionFailed(e.to_string()))
    }
}
