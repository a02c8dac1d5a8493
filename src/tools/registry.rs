//! 工具注册表
//!
//! 显式对象而非全局表：启动时注册全部工具（重名即失败），之后只读。
//! 每个工具携带链式提示（next_tool / chain_reason）与前置结果声明
//! （required_results），编排器据此做依赖检查与下一步推荐。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::ToolError;

/// 工具类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// 容器化链路上的一步（analyze / build / deploy ...）
    Workflow,
    /// 工作流级操作（start_workflow / workflow_status）
    Orchestration,
    /// 会话与注册表查询（list_sessions / list_tools ...）
    Utility,
}

/// 工具的静态描述：名称、说明、链式提示、依赖声明与输入 schema
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    /// 成功后推荐的下一个工具
    pub next_tool: Option<String>,
    /// 推荐理由（随结果返回给客户端）
    pub chain_reason: Option<String>,
    /// 执行前会话里必须已有结果的工具名列表
    pub required_results: Vec<String>,
    /// JSON Schema（schemars 生成）
    pub input_schema: Value,
}

impl ToolMetadata {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            next_tool: None,
            chain_reason: None,
            required_results: Vec::new(),
            input_schema: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn chain(mut self, next_tool: impl Into<String>, reason: impl Into<String>) -> Self {
        self.next_tool = Some(next_tool.into());
        self.chain_reason = Some(reason.into());
        self
    }

    pub fn requires(mut self, results: &[&str]) -> Self {
        self.required_results = results.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn schema<T: schemars::JsonSchema>(mut self) -> Self {
        self.input_schema =
            serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        self
    }
}

/// 一次工具执行的环境：所属会话、工作目录、取消令牌
#[derive(Clone)]
pub struct ExecContext {
    pub session_id: String,
    pub workspace_dir: std::path::PathBuf,
    pub cancel: CancellationToken,
}

impl ExecContext {
    pub fn new(session_id: impl Into<String>, workspace_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_dir: workspace_dir.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// 工具接口：validate 廉价无副作用，execute 做实际工作
#[async_trait]
pub trait Tool: Send + Sync {
    /// 参数校验；失败的调用不会进入 execute，也不会重试
    fn validate(&self, _args: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, ctx: ExecContext, args: Value) -> Result<Value, ToolError>;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Tool")
    }
}

struct Entry {
    tool: Arc<dyn Tool>,
    metadata: ToolMetadata,
}

/// 名称 -> 工具的注册表；注册期写、运行期读
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；名称重复返回 AlreadyRegistered
    pub fn register(&self, tool: Arc<dyn Tool>, metadata: ToolMetadata) -> Result<(), ToolError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ToolError::Storage("registry lock poisoned".into()))?;
        if entries.contains_key(&metadata.name) {
            return Err(ToolError::AlreadyRegistered(metadata.name));
        }
        entries.insert(metadata.name.clone(), Entry { tool, metadata });
        Ok(())
    }

    /// 按名称解析：返回工具与元数据副本
    pub fn resolve(&self, name: &str) -> Result<(Arc<dyn Tool>, ToolMetadata), ToolError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| ToolError::Storage("registry lock poisoned".into()))?;
        entries
            .get(name)
            .map(|e| (Arc::clone(&e.tool), e.metadata.clone()))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// 全部工具元数据快照（按名称排序，tools/list 用）
    pub fn list(&self) -> Vec<ToolMetadata> {
        let entries = match self.entries.read() {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut all: Vec<ToolMetadata> = entries.values().map(|e| e.metadata.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(name))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ToolRegistry::new();
        registry
            .register(
                Arc::new(EchoTool),
                ToolMetadata::new("echo", "echoes args", ToolCategory::Utility),
            )
            .unwrap();

        let (_, meta) = registry.resolve("echo").unwrap();
        assert_eq!(meta.name, "echo");
        assert!(registry.contains("echo"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = ToolRegistry::new();
        let meta = ToolMetadata::new("echo", "echoes args", ToolCategory::Utility);
        registry.register(Arc::new(EchoTool), meta.clone()).unwrap();

        let err = registry.register(Arc::new(EchoTool), meta).unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(name) if name == "echo"));
    }

    #[test]
    fn test_resolve_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.resolve("no_such_tool").unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[test]
    fn test_list_is_sorted_and_carries_chain_hints() {
        let registry = ToolRegistry::new();
        registry
            .register(
                Arc::new(EchoTool),
                ToolMetadata::new("b_tool", "", ToolCategory::Workflow)
                    .chain("c_tool", "then run c")
                    .requires(&["a_tool"]),
            )
            .unwrap();
        registry
            .register(
                Arc::new(EchoTool),
                ToolMetadata::new("a_tool", "", ToolCategory::Workflow),
            )
            .unwrap();

        let listed = registry.list();
        assert_eq!(listed[0].name, "a_tool");
        assert_eq!(listed[1].name, "b_tool");
        assert_eq!(listed[1].next_tool.as_deref(), Some("c_tool"));
        assert_eq!(listed[1].required_results, vec!["a_tool"]);
    }

    #[tokio::test]
    async fn test_default_validate_accepts_anything() {
        let tool = EchoTool;
        assert!(tool.validate(&json!({"whatever": 1})).is_ok());
    }
}
