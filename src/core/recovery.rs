//! 重试协调器
//!
//! 失败分类 + 指数退避重试：瞬时错误（超时、运行期失败）在次数上限内
//! 退避后重试，可选地先让 FixSuggester 修正参数；永久错误立即终止。
//! 退避等待期间响应取消令牌。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::error::{StepFailure, ToolError};

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 可重试：超时、工具运行期失败
    Transient,
    /// 不可重试：校验、依赖缺失、未知工具、取消、存储等
    Permanent,
}

/// 失败修正建议者：在重试前有机会改写参数。
/// 核心不内置任何 AI 客户端；外部实现注入。
#[async_trait]
pub trait FixSuggester: Send + Sync {
    /// 返回 Some(new_args) 表示下次重试改用新参数，None 表示原样重试
    async fn suggest(&self, failure: &StepFailure, args: &Value) -> Option<Value>;
}

pub struct RetryCoordinator {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    fix_suggester: Option<Arc<dyn FixSuggester>>,
}

impl RetryCoordinator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            fix_suggester: None,
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_fix_suggester(mut self, suggester: Arc<dyn FixSuggester>) -> Self {
        self.fix_suggester = Some(suggester);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(error: &ToolError) -> ErrorClass {
        if error.is_transient() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// 第 attempt 次失败后的退避时长：base * 2^(attempt-1)，封顶 max_delay
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// 驱动带重试的执行。run 闭包以 (attempt, args) 执行一次工具调用；
    /// 全部尝试失败时返回最后一次 StepFailure（attempt == max_attempts）。
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut args: Value,
        run: F,
    ) -> Result<Value, StepFailure>
    where
        F: Fn(u32, Value) -> Fut,
        Fut: std::future::Future<Output = Result<Value, StepFailure>>,
    {
        let mut attempt = 1;
        loop {
            let failure = match run(attempt, args.clone()).await {
                Ok(output) => return Ok(output),
                Err(failure) => failure,
            };

            if Self::classify(&failure.cause) == ErrorClass::Permanent
                || attempt >= self.max_attempts
            {
                return Err(failure);
            }

            let delay = self.backoff(attempt);
            tracing::info!(
                step = %failure.step,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "transient failure, backing off before retry"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(StepFailure::new(&failure.step, attempt, ToolError::Cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if let Some(suggester) = &self.fix_suggester {
                if let Some(fixed) = suggester.suggest(&failure, &args).await {
                    tracing::info!(step = %failure.step, "applying suggested fix to arguments");
                    args = fixed;
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient_failure(attempt: u32) -> StepFailure {
        StepFailure::new("build_image", attempt, ToolError::ExecutionFailed("exit 1".into()))
    }

    #[test]
    fn test_classify_table() {
        assert_eq!(
            RetryCoordinator::classify(&ToolError::Timeout {
                tool: "x".into(),
                limit: Duration::from_secs(1),
            }),
            ErrorClass::Transient
        );
        assert_eq!(
            RetryCoordinator::classify(&ToolError::ExecutionFailed("e".into())),
            ErrorClass::Transient
        );
        assert_eq!(
            RetryCoordinator::classify(&ToolError::Validation("v".into())),
            ErrorClass::Permanent
        );
        assert_eq!(
            RetryCoordinator::classify(&ToolError::MissingDependency {
                tool: "a".into(),
                needs: "b".into(),
            }),
            ErrorClass::Permanent
        );
        assert_eq!(
            RetryCoordinator::classify(&ToolError::UnknownTool("t".into())),
            ErrorClass::Permanent
        );
        assert_eq!(
            RetryCoordinator::classify(&ToolError::Cancelled),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryCoordinator::new(5)
            .with_backoff(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(500));
        assert_eq!(retry.backoff(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_transient_retries_exactly_max_attempts() {
        let retry =
            RetryCoordinator::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let failure = retry
            .execute(&cancel, json!({}), |attempt, _args| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(transient_failure(attempt)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempt, 3);
        assert!(failure.recoverable);
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retried() {
        let retry = RetryCoordinator::new(3);
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let failure = retry
            .execute(&cancel, json!({}), |attempt, _args| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(StepFailure::new(
                        "build_image",
                        attempt,
                        ToolError::Validation("bad args".into()),
                    ))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempt, 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let retry =
            RetryCoordinator::new(3).with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let out = retry
            .execute(&cancel, json!({}), |attempt, _args| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient_failure(attempt))
                    } else {
                        Ok(json!({"image": "app:v1"}))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(out, json!({"image": "app:v1"}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fix_suggester_mutates_args_before_retry() {
        struct AddFlag;

        #[async_trait]
        impl FixSuggester for AddFlag {
            async fn suggest(&self, _failure: &StepFailure, args: &Value) -> Option<Value> {
                let mut fixed = args.clone();
                fixed["no_cache"] = json!(true);
                Some(fixed)
            }
        }

        let retry = RetryCoordinator::new(2)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2))
            .with_fix_suggester(Arc::new(AddFlag));
        let cancel = CancellationToken::new();
        let seen_fixed = AtomicU32::new(0);

        let out = retry
            .execute(&cancel, json!({"image": "app"}), |attempt, args| {
                let fixed = args.get("no_cache") == Some(&json!(true));
                if fixed {
                    seen_fixed.fetch_add(1, Ordering::SeqCst);
                }
                async move {
                    if attempt == 1 {
                        Err(transient_failure(attempt))
                    } else {
                        Ok(args)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(seen_fixed.load(Ordering::SeqCst), 1);
        assert_eq!(out["no_cache"], json!(true));
    }

    #[tokio::test]
    async fn test_backoff_respects_cancellation() {
        let retry = RetryCoordinator::new(3)
            .with_backoff(Duration::from_secs(30), Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = retry
            .execute(&cancel, json!({}), |attempt, _args| async move {
                Err(transient_failure(attempt))
            })
            .await
            .unwrap_err();
        assert!(matches!(failure.cause, ToolError::Cancelled));
    }
}
