//! 持久化键值存储抽象
//!
//! 每个键带单调递增版本号，put 采用 CAS（expected_version 不匹配返回 Conflict），
//! 供 SessionManager 实现乐观并发。两种实现：内存（测试 / 默认）与 SQLite（跨重启恢复）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::RwLock;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// CAS 版本不匹配（并发写入竞争）
    #[error("version conflict on key '{key}': expected {expected:?}, found {found:?}")]
    Conflict {
        key: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// 键值存储接口：get 返回值与版本，put 带 CAS，delete 幂等
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// 读取键：返回 (值, 版本)；不存在返回 None
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError>;

    /// 写入键。expected_version 为 None 表示「必须不存在」（创建）；
    /// Some(v) 表示「当前版本必须等于 v」（替换）。返回新版本号。
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// 删除键；键不存在时也返回 Ok（幂等）
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// 列出所有键（会话列表用）
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// 内存存储：HashMap + RwLock，版本号从 1 开始递增
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, (Vec<u8>, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map(|(_, v)| *v);
        if current != expected_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
                found: current,
            });
        }
        let next = current.unwrap_or(0) + 1;
        entries.insert(key.to_string(), (value, next));
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// SQLite 存储：单表 (key, value, version)，同步 rusqlite 经 spawn_blocking 包装
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程上执行一个需要连接的闭包
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection mutex poisoned".into()))?;
            f(&guard).map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value, version FROM sessions WHERE key = ?1",
                params![key],
                |row| {
                    let value: Vec<u8> = row.get(0)?;
                    let version: i64 = row.get(1)?;
                    Ok((value, version as u64))
                },
            )
            .optional()
        })
        .await
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_version: Option<u64>,
    ) -> Result<u64, StoreError> {
        let key_owned = key.to_string();
        let result = self
            .with_conn(move |conn| {
                let current: Option<i64> = conn
                    .query_row(
                        "SELECT version FROM sessions WHERE key = ?1",
                        params![key_owned],
                        |row| row.get(0),
                    )
                    .optional()?;
                let current_u64 = current.map(|v| v as u64);
                if current_u64 != expected_version {
                    // 用 Ok(Err(..)) 把冲突带出闭包，避免和 rusqlite 错误混淆
                    return Ok(Err(current_u64));
                }
                let next = current.unwrap_or(0) + 1;
                conn.execute(
                    "INSERT INTO sessions (key, value, version) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = ?2, version = ?3",
                    params![key_owned, value, next],
                )?;
                Ok(Ok(next as u64))
            })
            .await?;

        result.map_err(|found| StoreError::Conflict {
            key: key.to_string(),
            expected: expected_version,
            found,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sessions WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM sessions")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}
