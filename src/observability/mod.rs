//! 可观测性：tracing 初始化与进度观察者
//!
//! 观察者回调由执行器在工具生命周期节点调用；默认实现写结构化日志，
//! 测试里用计数观察者断言调用次数。

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::core::error::StepFailure;

/// 初始化全局 tracing：默认 info，RUST_LOG 覆盖。
/// 日志走 stderr，stdout 留给 MCP 协议帧。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .init();
}

/// 工具执行进度观察者
pub trait ProgressObserver: Send + Sync {
    fn on_start(&self, session_id: &str, tool: &str, attempt: u32);
    fn on_complete(&self, session_id: &str, tool: &str, attempt: u32, elapsed: Duration);
    fn on_fail(&self, session_id: &str, failure: &StepFailure);
}

/// 默认观察者：每个节点一条 tracing 日志
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_start(&self, session_id: &str, tool: &str, attempt: u32) {
        tracing::info!(session_id, tool, attempt, "tool started");
    }

    fn on_complete(&self, session_id: &str, tool: &str, attempt: u32, elapsed: Duration) {
        tracing::info!(
            session_id,
            tool,
            attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            "tool completed"
        );
    }

    fn on_fail(&self, session_id: &str, failure: &StepFailure) {
        tracing::warn!(
            session_id,
            tool = %failure.step,
            attempt = failure.attempt,
            recoverable = failure.recoverable,
            cause = %failure.cause,
            "tool failed"
        );
    }
}

/// 便捷构造
pub fn default_observer() -> Arc<dyn ProgressObserver> {
    Arc::new(TracingObserver)
}
