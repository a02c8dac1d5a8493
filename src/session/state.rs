//! 会话实体
//!
//! 工具结果的唯一规范存放点是 metadata["results"]（工具名 -> 最近一次成功结果），
//! 读写只经 results / result / set_result 三个方法，杜绝多处存放导致的读写不一致。
//! schema_version 字段支持读取时一次性就地升级（v1 的顶层 results 字段迁入 metadata）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

/// 当前持久化 schema 版本
pub const SCHEMA_VERSION: u32 = 2;

const RESULTS_KEY: &str = "results";

/// 会话层错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent update conflict on session {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("session schema error: {0}")]
    Schema(String),
}

/// 单个工作流会话：工作目录、步骤进度、工具结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_dir: PathBuf,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// 自由元数据；其中 "results" 子对象是工具结果的唯一存放点
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

impl Session {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            workspace_dir: workspace_dir.into(),
            current_step: None,
            completed_steps: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn with_id(id: impl Into<String>, workspace_dir: impl Into<PathBuf>) -> Self {
        let mut session = Self::new(workspace_dir);
        session.id = id.into();
        session
    }

    /// 规范结果子表（只读）
    pub fn results(&self) -> Option<&Map<String, Value>> {
        self.metadata.get(RESULTS_KEY).and_then(Value::as_object)
    }

    /// 读取某工具的最近一次成功结果
    pub fn result(&self, tool_name: &str) -> Option<&Value> {
        self.results().and_then(|r| r.get(tool_name))
    }

    /// 写入某工具的结果（唯一写入路径；覆盖旧值）
    pub fn set_result(&mut self, tool_name: &str, value: Value) {
        let results = self
            .metadata
            .entry(RESULTS_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !results.is_object() {
            *results = Value::Object(Map::new());
        }
        if let Some(map) = results.as_object_mut() {
            map.insert(tool_name.to_string(), value);
        }
    }

    /// 标记步骤完成（去重，保持首次完成顺序）
    pub fn mark_step_completed(&mut self, step: &str) {
        if !self.completed_steps.iter().any(|s| s == step) {
            self.completed_steps.push(step.to_string());
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(self).map_err(|e| SessionError::Schema(e.to_string()))
    }

    /// 解码并就地升级旧版 schema：
    /// v1 曾把 results 放在顶层字段，读取时迁入 metadata["results"]；
    /// 未知的未来版本直接报错而非静默丢数据。
    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        let mut raw: Value =
            serde_json::from_slice(bytes).map_err(|e| SessionError::Schema(e.to_string()))?;

        let version = raw
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        if version > SCHEMA_VERSION {
            return Err(SessionError::Schema(format!(
                "unsupported schema version {version} (this build supports up to {SCHEMA_VERSION})"
            )));
        }

        if version < 2 {
            upgrade_v1(&mut raw);
        }

        let mut session: Session =
            serde_json::from_value(raw).map_err(|e| SessionError::Schema(e.to_string()))?;
        session.schema_version = SCHEMA_VERSION;
        Ok(session)
    }
}

/// v1 -> v2：顶层 results 字段迁入 metadata["results"]
fn upgrade_v1(raw: &mut Value) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };
    let Some(top_level) = obj.remove(RESULTS_KEY) else {
        return;
    };
    let metadata = obj
        .entry("metadata".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = metadata.as_object_mut() {
        // metadata 里已有 results 时以 metadata 为准，丢弃顶层旧值
        meta.entry(RESULTS_KEY.to_string()).or_insert(top_level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_result_is_the_single_location() {
        let mut session = Session::new("/repo/foo");
        session.set_result("analyze_repository", json!({"language": "rust"}));

        assert_eq!(
            session.result("analyze_repository"),
            Some(&json!({"language": "rust"}))
        );

        // 序列化形态里 results 只出现在 metadata 之下
        let encoded = serde_json::to_value(&session).unwrap();
        assert!(encoded.get("results").is_none());
        assert!(encoded["metadata"]["results"]["analyze_repository"].is_object());
    }

    #[test]
    fn test_set_result_overwrites() {
        let mut session = Session::new("/repo/foo");
        session.set_result("build_image", json!({"image": "a:v1"}));
        session.set_result("build_image", json!({"image": "a:v2"}));
        assert_eq!(session.result("build_image"), Some(&json!({"image": "a:v2"})));
        assert_eq!(session.results().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_step_completed_dedupes() {
        let mut session = Session::new("/repo/foo");
        session.mark_step_completed("analyze_repository");
        session.mark_step_completed("generate_dockerfile");
        session.mark_step_completed("analyze_repository");
        assert_eq!(
            session.completed_steps,
            vec!["analyze_repository", "generate_dockerfile"]
        );
    }

    #[test]
    fn test_decode_upgrades_v1_layout() {
        // v1 记录：results 在顶层，无 schema_version
        let v1 = json!({
            "id": "session_old",
            "workspace_dir": "/repo/foo",
            "completed_steps": ["analyze_repository"],
            "results": {"analyze_repository": {"language": "go"}},
            "metadata": {},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        });
        let session = Session::decode(&serde_json::to_vec(&v1).unwrap()).unwrap();
        assert_eq!(session.schema_version, SCHEMA_VERSION);
        assert_eq!(
            session.result("analyze_repository"),
            Some(&json!({"language": "go"}))
        );
    }

    #[test]
    fn test_decode_rejects_future_schema() {
        let future = json!({
            "id": "session_x",
            "workspace_dir": "/repo/foo",
            "metadata": {},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "schema_version": 99
        });
        let err = Session::decode(&serde_json::to_vec(&future).unwrap()).unwrap_err();
        assert!(matches!(err, SessionError::Schema(_)));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut session = Session::new("/repo/foo");
        session.set_result("scan_image", json!({"critical": 0}));
        session.mark_step_completed("scan_image");
        let decoded = Session::decode(&session.encode().unwrap()).unwrap();
        assert_eq!(decoded.id, session.id);
        assert_eq!(decoded.result("scan_image"), Some(&json!({"critical": 0})));
    }
}
