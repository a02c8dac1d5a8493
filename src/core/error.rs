//! 工具与工作流错误类型
//!
//! 与 RetryCoordinator 配合：Timeout / ExecutionFailed 视为瞬时错误可重试，
//! Validation / MissingDependency / Cancelled 等永久错误立即终止。

use std::time::Duration;

use thiserror::Error;

/// 工具执行过程中可能出现的错误（校验、依赖缺失、超时、存储冲突等）
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(String),

    /// 工具声明的前置结果缺失（如 build_image 要求先有 generate_dockerfile 的结果）
    #[error("Tool '{tool}' requires the result of '{needs}', which is not present in this session. Run '{needs}' first.")]
    MissingDependency { tool: String, needs: String },

    #[error("Tool '{tool}' timed out after {}s", .limit.as_secs())]
    Timeout { tool: String, limit: Duration },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled by caller")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    /// 会话更新的乐观并发冲突（内部已重试，仍冲突则上抛）
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Session schema error: {0}")]
    Schema(String),
}

impl ToolError {
    /// 瞬时错误（可重试）：超时、工具运行期失败。其余一律永久。
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout { .. } | ToolError::ExecutionFailed(_))
    }
}

impl From<crate::session::SessionError> for ToolError {
    fn from(err: crate::session::SessionError) -> Self {
        use crate::session::SessionError;
        match err {
            SessionError::NotFound(id) => ToolError::NotFound(id),
            SessionError::Validation(msg) => ToolError::Validation(msg),
            SessionError::Conflict(id) => ToolError::Conflict(id),
            SessionError::Storage(msg) => ToolError::Storage(msg),
            SessionError::Schema(msg) => ToolError::Schema(msg),
        }
    }
}

/// 单次工具执行失败的上下文：步骤名、尝试次数、根因、是否可恢复
#[derive(Error, Debug, Clone)]
#[error("step '{step}' failed on attempt {attempt}: {cause}")]
pub struct StepFailure {
    pub step: String,
    pub attempt: u32,
    pub cause: ToolError,
    pub recoverable: bool,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, attempt: u32, cause: ToolError) -> Self {
        let recoverable = cause.is_transient();
        Self {
            step: step.into(),
            attempt,
            cause,
            recoverable,
        }
    }
}
