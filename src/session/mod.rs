//! 会话模块：实体、持久化存储与管理器

pub mod manager;
pub mod state;
pub mod store;

pub use manager::{SessionManager, SessionSummary};
pub use state::{Session, SessionError, SCHEMA_VERSION};
pub use store::{DurableStore, MemoryStore, SqliteStore, StoreError};
