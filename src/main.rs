//! hermit 入口：日志 → 配置 → 存储 → 注册表 → stdio 服务

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hermit::config::AppConfig;
use hermit::core::orchestrator::Orchestrator;
use hermit::core::recovery::RetryCoordinator;
use hermit::observability;
use hermit::server::StdioServer;
use hermit::session::{DurableStore, MemoryStore, SessionManager, SqliteStore};
use hermit::tools::executor::ToolExecutor;
use hermit::tools::registry::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        timeout_secs = cfg.tools.tool_timeout_secs,
        max_attempts = cfg.orchestrator.max_retry_attempts,
        persistent = cfg.session.db_path.is_some(),
        "hermit starting"
    );

    let store: Arc<dyn DurableStore> = match &cfg.session.db_path {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .map_err(|e| anyhow::anyhow!("opening session database '{path}': {e}"))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let sessions = Arc::new(SessionManager::new(store));

    let registry = Arc::new(ToolRegistry::new());
    hermit::tools::register_all(&registry, &sessions).context("registering tools")?;

    let executor = Arc::new(ToolExecutor::new(
        Duration::from_secs(cfg.tools.tool_timeout_secs),
        observability::default_observer(),
    ));
    let retry = Arc::new(RetryCoordinator::new(cfg.orchestrator.max_retry_attempts));
    let orchestrator = Arc::new(Orchestrator::new(
        registry,
        Arc::clone(&sessions),
        executor,
        retry,
        cfg.app.workspace_root.clone(),
    ));

    // 后台 TTL 清理
    let ttl = Duration::from_secs(cfg.session.ttl_secs);
    let sweeper_sessions = Arc::clone(&sessions);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match sweeper_sessions.cleanup_expired(ttl).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "expired sessions cleaned up"),
                Err(e) => tracing::warn!(error = %e, "session cleanup failed"),
            }
        }
    });

    let server = StdioServer::new(orchestrator);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    server.serve().await
}
