//! 工作流编排器
//!
//! 一次 tools/call 的完整通路：会话解析（起始工具可隐式建会话）→
//! 工具解析 → 前置结果检查 → 注入先前结果（args["_prior"]）→
//! 执行器 + 重试协调器 → 成功后写回结果与步骤进度 → 链式提示。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::error::ToolError;
use crate::core::recovery::RetryCoordinator;
use crate::session::{SessionError, SessionManager};
use crate::tools::executor::ToolExecutor;
use crate::tools::registry::{ExecContext, ToolRegistry};

/// 可以在无既有会话时调用并隐式创建会话的工具
const START_TOOLS: &[&str] = &["analyze_repository", "start_workflow"];

/// 下一步推荐：随每次成功结果返回给客户端
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChainHint {
    pub next_tool: String,
    pub reason: String,
}

/// 一次工具调用的结果
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub session_id: String,
    pub output: Value,
    pub chain_hint: Option<ChainHint>,
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionManager>,
    executor: Arc<ToolExecutor>,
    retry: Arc<RetryCoordinator>,
    workspace_root: std::path::PathBuf,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionManager>,
        executor: Arc<ToolExecutor>,
        retry: Arc<RetryCoordinator>,
        workspace_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            registry,
            sessions,
            executor,
            retry,
            workspace_root: workspace_root.into(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行一个工具。session_id 为空时生成新 id；
    /// 会话不存在且工具是起始工具时隐式创建。
    pub async fn execute_tool(
        &self,
        cancel: CancellationToken,
        session_id: Option<&str>,
        tool_name: &str,
        mut args: Value,
    ) -> Result<ToolInvocation, ToolError> {
        let (tool, metadata) = self.registry.resolve(tool_name)?;

        if args.is_null() {
            args = Value::Object(serde_json::Map::new());
        } else if !args.is_object() {
            return Err(ToolError::Validation(
                "tool arguments must be a JSON object".into(),
            ));
        }

        let session = self.resolve_session(session_id, tool_name, &args).await?;

        // 前置结果检查：任何缺失都在执行前失败
        for needed in &metadata.required_results {
            if session.result(needed).is_none() {
                return Err(ToolError::MissingDependency {
                    tool: tool_name.to_string(),
                    needs: needed.clone(),
                });
            }
        }

        // 会话里的既有结果注入参数，工具从 args["_prior"][tool] 读取；
        // 依赖检查只看 required_results
        if let Some(results) = session.results() {
            args["_prior"] = Value::Object(results.clone());
        }

        let ctx = ExecContext {
            session_id: session.id.clone(),
            workspace_dir: session.workspace_dir.clone(),
            cancel,
        };

        self.sessions
            .update(&session.id, |s| {
                s.current_step = Some(tool_name.to_string());
                Ok(())
            })
            .await?;

        let executor = Arc::clone(&self.executor);
        let output = self
            .retry
            .execute(&ctx.cancel, args, |attempt, attempt_args| {
                let executor = Arc::clone(&executor);
                let tool = Arc::clone(&tool);
                let metadata = metadata.clone();
                let ctx = ctx.clone();
                async move {
                    executor
                        .run(&tool, &metadata, &ctx, attempt_args, attempt)
                        .await
                }
            })
            .await
            .map_err(|failure| match &failure.cause {
                // 取消与执行前失败原样上抛；其余终端错误（含超时）统一
                // 带上步骤名与尝试次数
                ToolError::Cancelled => ToolError::Cancelled,
                ToolError::Validation(_) | ToolError::MissingDependency { .. } => {
                    failure.cause.clone()
                }
                _ => ToolError::ExecutionFailed(failure.to_string()),
            })?;

        self.sessions
            .update(&session.id, |s| {
                s.set_result(tool_name, output.clone());
                s.mark_step_completed(tool_name);
                s.current_step = None;
                Ok(())
            })
            .await?;

        let chain_hint = match (&metadata.next_tool, &metadata.chain_reason) {
            (Some(next), reason) => Some(ChainHint {
                next_tool: next.clone(),
                reason: reason.clone().unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(ToolInvocation {
            session_id: session.id,
            output,
            chain_hint,
        })
    }

    /// 会话解析：已有会话直接用；起始工具允许隐式创建
    async fn resolve_session(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        args: &Value,
    ) -> Result<crate::session::Session, ToolError> {
        let workspace = args
            .get("repo_path")
            .and_then(Value::as_str)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| self.workspace_root.clone());

        match session_id {
            Some(id) if !id.is_empty() => match self.sessions.get(id).await {
                Ok(session) => Ok(session),
                Err(SessionError::NotFound(_)) if START_TOOLS.contains(&tool_name) => {
                    Ok(self.sessions.create_with_id(id, workspace).await?)
                }
                Err(e) => Err(e.into()),
            },
            _ if START_TOOLS.contains(&tool_name) => {
                Ok(self.sessions.create(workspace).await?)
            }
            _ => Err(ToolError::Validation(format!(
                "tool '{tool_name}' requires an existing session_id; start with 'analyze_repository' or 'start_workflow'"
            ))),
        }
    }
}

/// 工作流步骤的推荐顺序（workflow_status 的进度计算用）
pub const WORKFLOW_STEPS: &[&str] = &[
    "analyze_repository",
    "generate_dockerfile",
    "build_image",
    "scan_image",
    "tag_image",
    "push_image",
    "generate_k8s_manifests",
    "prepare_cluster",
    "deploy_application",
    "verify_deployment",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recovery::RetryCoordinator;
    use crate::observability::{ProgressObserver, TracingObserver};
    use crate::session::MemoryStore;
    use crate::tools::registry::{Tool, ToolCategory, ToolMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FixedTool {
        output: Value,
        executions: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for FixedTool {
        async fn execute(&self, _ctx: ExecContext, _args: Value) -> Result<Value, ToolError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    fn orchestrator(registry: Arc<ToolRegistry>) -> Orchestrator {
        let sessions = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
        let executor = Arc::new(ToolExecutor::new(
            Duration::from_secs(5),
            Arc::new(TracingObserver) as Arc<dyn ProgressObserver>,
        ));
        let retry = Arc::new(
            RetryCoordinator::new(3)
                .with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
        );
        Orchestrator::new(registry, sessions, executor, retry, "/tmp")
    }

    fn register_fixed(
        registry: &ToolRegistry,
        meta: ToolMetadata,
        output: Value,
    ) -> Arc<AtomicU32> {
        let executions = Arc::new(AtomicU32::new(0));
        registry
            .register(
                Arc::new(FixedTool {
                    output,
                    executions: Arc::clone(&executions),
                }),
                meta,
            )
            .unwrap();
        executions
    }

    #[tokio::test]
    async fn test_start_tool_creates_session_implicitly() {
        let registry = Arc::new(ToolRegistry::new());
        register_fixed(
            &registry,
            ToolMetadata::new("analyze_repository", "", ToolCategory::Workflow)
                .chain("generate_dockerfile", "analysis complete"),
            json!({"language": "rust"}),
        );
        let orch = orchestrator(Arc::clone(&registry));

        let invocation = orch
            .execute_tool(
                CancellationToken::new(),
                None,
                "analyze_repository",
                json!({"repo_path": "/repo/foo"}),
            )
            .await
            .unwrap();

        assert!(invocation.session_id.starts_with("session_"));
        assert_eq!(
            invocation.chain_hint,
            Some(ChainHint {
                next_tool: "generate_dockerfile".into(),
                reason: "analysis complete".into(),
            })
        );

        let session = orch.sessions().get(&invocation.session_id).await.unwrap();
        assert_eq!(
            session.result("analyze_repository"),
            Some(&json!({"language": "rust"}))
        );
        assert_eq!(session.completed_steps, vec!["analyze_repository"]);
        assert_eq!(session.current_step, None);
    }

    #[tokio::test]
    async fn test_non_start_tool_without_session_is_rejected() {
        let registry = Arc::new(ToolRegistry::new());
        register_fixed(
            &registry,
            ToolMetadata::new("build_image", "", ToolCategory::Workflow),
            json!({}),
        );
        let orch = orchestrator(registry);

        let err = orch
            .execute_tool(CancellationToken::new(), None, "build_image", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_dependency_blocks_execution() {
        let registry = Arc::new(ToolRegistry::new());
        register_fixed(
            &registry,
            ToolMetadata::new("analyze_repository", "", ToolCategory::Workflow),
            json!({"language": "rust"}),
        );
        let executions = register_fixed(
            &registry,
            ToolMetadata::new("build_image", "", ToolCategory::Workflow)
                .requires(&["generate_dockerfile"]),
            json!({}),
        );
        let orch = orchestrator(registry);

        let session_id = orch
            .execute_tool(
                CancellationToken::new(),
                None,
                "analyze_repository",
                json!({}),
            )
            .await
            .unwrap()
            .session_id;

        let err = orch
            .execute_tool(
                CancellationToken::new(),
                Some(&session_id),
                "build_image",
                json!({}),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ToolError::MissingDependency { ref needs, .. } if needs == "generate_dockerfile"
        ));
        // build_image 的 execute 从未被调用
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prior_results_are_injected() {
        struct PriorReader;

        #[async_trait]
        impl Tool for PriorReader {
            async fn execute(&self, _ctx: ExecContext, args: Value) -> Result<Value, ToolError> {
                Ok(args["_prior"]["analyze_repository"].clone())
            }
        }

        let registry = Arc::new(ToolRegistry::new());
        register_fixed(
            &registry,
            ToolMetadata::new("analyze_repository", "", ToolCategory::Workflow),
            json!({"language": "go", "port": 8080}),
        );
        registry
            .register(
                Arc::new(PriorReader),
                ToolMetadata::new("generate_dockerfile", "", ToolCategory::Workflow)
                    .requires(&["analyze_repository"]),
            )
            .unwrap();
        let orch = orchestrator(registry);

        let session_id = orch
            .execute_tool(
                CancellationToken::new(),
                None,
                "analyze_repository",
                json!({}),
            )
            .await
            .unwrap()
            .session_id;

        let invocation = orch
            .execute_tool(
                CancellationToken::new(),
                Some(&session_id),
                "generate_dockerfile",
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(invocation.output, json!({"language": "go", "port": 8080}));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = Arc::new(ToolRegistry::new());
        let orch = orchestrator(registry);
        let err = orch
            .execute_tool(CancellationToken::new(), None, "nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }
}
