//! 配置加载
//!
//! config/default.toml 为基底，HERMIT__ 前缀环境变量覆盖
//! （双下划线分层，如 HERMIT__ORCHESTRATOR__MAX_RETRY_ATTEMPTS=5）。

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// repo_path 缺省时使用的工作区根目录
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 单步最大尝试次数（含首次）
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具执行的超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 会话过期时间（秒）
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// SQLite 文件路径；不设置则用内存存储
    #[serde(default)]
    pub db_path: Option<String>,
}

fn default_workspace_root() -> String {
    ".".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_tool_timeout_secs() -> u64 {
    300
}

fn default_session_ttl_secs() -> u64 {
    86400
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
        }
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            db_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("HERMIT").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_without_any_source() {
        let cfg: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.orchestrator.max_retry_attempts, 3);
        assert_eq!(cfg.tools.tool_timeout_secs, 300);
        assert_eq!(cfg.session.ttl_secs, 86400);
        assert!(cfg.session.db_path.is_none());
    }
}
