//! 会话管理器
//!
//! 所有会话写入的唯一通道：update 在会话级锁内做 load-mutate-persist，
//! 持久化经 CAS 版本校验；同一会话串行（单写者），不同会话并行。
//! 结果读写统一走 store_result / get_result，保证唯一规范存放点。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::session::state::{Session, SessionError};
use crate::session::store::{DurableStore, StoreError};

/// CAS 冲突时整个 load-mutate-persist 的内部重试次数
const CONFLICT_RETRIES: u32 = 3;

/// 会话列表项（list 返回的摘要）
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub workspace_dir: PathBuf,
    pub current_step: Option<String>,
    pub completed_steps: Vec<String>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.id.clone(),
            workspace_dir: s.workspace_dir.clone(),
            current_step: s.current_step.clone(),
            completed_steps: s.completed_steps.clone(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// 会话管理器：持久化存储 + 会话级写锁
pub struct SessionManager {
    store: Arc<dyn DurableStore>,
    /// session_id -> 写锁；锁表本身用 RwLock 保护
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// 取（或建）某会话的写锁
    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(session_id) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// 创建新会话（自动分配 id）
    pub async fn create(&self, workspace_dir: impl Into<PathBuf>) -> Result<Session, SessionError> {
        self.persist_new(Session::new(workspace_dir)).await
    }

    /// 以调用方提供的 id 创建会话（MCP 客户端自带 session_id 的场景）
    pub async fn create_with_id(
        &self,
        session_id: &str,
        workspace_dir: impl Into<PathBuf>,
    ) -> Result<Session, SessionError> {
        if session_id.is_empty() {
            return Err(SessionError::Validation("session id must not be empty".into()));
        }
        self.persist_new(Session::with_id(session_id, workspace_dir))
            .await
    }

    async fn persist_new(&self, session: Session) -> Result<Session, SessionError> {
        let bytes = session.encode()?;
        match self.store.put(&session.id, bytes, None).await {
            Ok(_) => Ok(session),
            Err(StoreError::Conflict { .. }) => Err(SessionError::Conflict(session.id)),
            Err(e) => Err(SessionError::Storage(e.to_string())),
        }
    }

    /// 读取会话
    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        let (bytes, _) = self.load_versioned(session_id).await?;
        Session::decode(&bytes)
    }

    async fn load_versioned(&self, session_id: &str) -> Result<(Vec<u8>, u64), SessionError> {
        self.store
            .get(session_id)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// 唯一合法的写路径：会话级锁内 load-mutate-persist，CAS 冲突有限重试。
    /// 调用方不得拿 get 的返回值自行持久化。
    pub async fn update<F>(&self, session_id: &str, mutate: F) -> Result<Session, SessionError>
    where
        F: Fn(&mut Session) -> Result<(), SessionError>,
    {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        for attempt in 0..=CONFLICT_RETRIES {
            let (bytes, version) = self.load_versioned(session_id).await?;
            let mut session = Session::decode(&bytes)?;
            mutate(&mut session)?;
            session.updated_at = Utc::now();

            match self
                .store
                .put(session_id, session.encode()?, Some(version))
                .await
            {
                Ok(_) => return Ok(session),
                Err(StoreError::Conflict { .. }) if attempt < CONFLICT_RETRIES => {
                    // 外部进程竞争写入，退避后整体重做
                    tracing::warn!(session_id, attempt, "session update conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * (attempt as u64 + 1))).await;
                }
                Err(StoreError::Conflict { .. }) => {
                    return Err(SessionError::Conflict(session_id.to_string()));
                }
                Err(e) => return Err(SessionError::Storage(e.to_string())),
            }
        }
        Err(SessionError::Conflict(session_id.to_string()))
    }

    /// 写入工具结果到规范位置（metadata["results"][tool_name]）
    pub async fn store_result(
        &self,
        session_id: &str,
        tool_name: &str,
        result: Value,
    ) -> Result<(), SessionError> {
        if session_id.is_empty() {
            return Err(SessionError::Validation("session id must not be empty".into()));
        }
        if tool_name.is_empty() {
            return Err(SessionError::Validation("tool name must not be empty".into()));
        }
        self.update(session_id, |session| {
            session.set_result(tool_name, result.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// 类型化读取工具结果；不存在或类型不匹配返回 None，绝不 panic
    pub async fn get_result<T: DeserializeOwned>(
        &self,
        session_id: &str,
        tool_name: &str,
    ) -> Option<T> {
        let session = self.get(session_id).await.ok()?;
        let value = session.result(tool_name)?.clone();
        serde_json::from_value(value).ok()
    }

    /// 删除会话；不存在也返回 Ok（幂等）。
    /// 锁表项保留：已持有旧锁句柄的任务与后续调用仍经同一把锁串行，
    /// 表的规模以见过的会话数为界。
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;
        self.store
            .delete(session_id)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }

    /// 列出全部会话摘要（解码失败的记录跳过并告警）
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let keys = self
            .store
            .list_keys()
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        let mut summaries = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(&key).await {
                Ok(session) => summaries.push(SessionSummary::from(&session)),
                Err(SessionError::NotFound(_)) => {} // 并发删除，忽略
                Err(e) => tracing::warn!(session_id = %key, error = %e, "skipping undecodable session"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// 清理超过 TTL 未更新的会话，返回清理数量
    pub async fn cleanup_expired(&self, ttl: Duration) -> Result<usize, SessionError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| SessionError::Validation(e.to_string()))?;
        let mut removed = 0;
        for summary in self.list().await? {
            if summary.updated_at < cutoff {
                self.delete(&summary.session_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
