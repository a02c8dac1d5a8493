//! 工具执行包装器
//!
//! 单次执行的统一通道：观察者通知 → 参数校验（失败短路，不进 execute）
//! → 超时与取消令牌下执行 → 每次调用一条 JSON 审计日志。
//! 重试不在这里做，由 RetryCoordinator 驱动多次 run。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::error::{StepFailure, ToolError};
use crate::observability::ProgressObserver;
use crate::tools::registry::{ExecContext, Tool, ToolMetadata};

pub struct ToolExecutor {
    timeout: Duration,
    observer: Arc<dyn ProgressObserver>,
}

impl ToolExecutor {
    pub fn new(timeout: Duration, observer: Arc<dyn ProgressObserver>) -> Self {
        Self { timeout, observer }
    }

    /// 执行一次工具调用。attempt 从 1 计数，由调用方（重试协调器）递增。
    pub async fn run(
        &self,
        tool: &Arc<dyn Tool>,
        metadata: &ToolMetadata,
        ctx: &ExecContext,
        args: Value,
        attempt: u32,
    ) -> Result<Value, StepFailure> {
        self.observer.on_start(&ctx.session_id, &metadata.name, attempt);
        let started = Instant::now();

        // 校验失败立即终止：不执行、不重试
        if let Err(cause) = tool.validate(&args) {
            let failure = StepFailure::new(&metadata.name, attempt, cause);
            self.audit(ctx, metadata, attempt, started.elapsed(), Err(&failure));
            self.observer.on_fail(&ctx.session_id, &failure);
            return Err(failure);
        }

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            timed = tokio::time::timeout(self.timeout, tool.execute(ctx.clone(), args)) => {
                match timed {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout {
                        tool: metadata.name.clone(),
                        limit: self.timeout,
                    }),
                }
            }
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(output) => {
                self.audit(ctx, metadata, attempt, elapsed, Ok(()));
                self.observer
                    .on_complete(&ctx.session_id, &metadata.name, attempt, elapsed);
                Ok(output)
            }
            Err(cause) => {
                let failure = StepFailure::new(&metadata.name, attempt, cause);
                self.audit(ctx, metadata, attempt, elapsed, Err(&failure));
                self.observer.on_fail(&ctx.session_id, &failure);
                Err(failure)
            }
        }
    }

    /// 每次调用一条结构化审计日志
    fn audit(
        &self,
        ctx: &ExecContext,
        metadata: &ToolMetadata,
        attempt: u32,
        elapsed: Duration,
        outcome: Result<(), &StepFailure>,
    ) {
        let audit = serde_json::json!({
            "session_id": ctx.session_id,
            "tool": metadata.name,
            "category": metadata.category,
            "attempt": attempt,
            "duration_ms": elapsed.as_millis() as u64,
            "outcome": match outcome {
                Ok(()) => "success".to_string(),
                Err(f) => format!("failed: {}", f.cause),
            },
        });
        tracing::info!(audit = %audit, "tool_call");
    }
}
