//! 会话并发不变量：同一会话单写者、不同会话并行、无丢更新

use std::sync::Arc;

use serde_json::{json, Value};

use hermit::session::{MemoryStore, SessionManager, SqliteStore};

#[tokio::test]
async fn concurrent_updates_apply_exactly_n_times() {
    let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
    let session = manager.create("/repo/app").await.unwrap();

    let n: i64 = 50;
    let mut handles = Vec::new();
    for _ in 0..n {
        let manager = Arc::clone(&manager);
        let id = session.id.clone();
        handles.push(tokio::spawn(async move {
            manager
                .update(&id, |s| {
                    let current = s
                        .metadata
                        .get("counter")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    s.metadata.insert("counter".into(), json!(current + 1));
                    Ok(())
                })
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let final_state = manager.get(&session.id).await.unwrap();
    assert_eq!(final_state.metadata.get("counter"), Some(&json!(n)));
}

#[tokio::test]
async fn two_concurrent_step_appends_both_survive() {
    let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
    let session = manager.create("/repo/app").await.unwrap();

    let a = {
        let manager = Arc::clone(&manager);
        let id = session.id.clone();
        tokio::spawn(async move {
            manager
                .update(&id, |s| {
                    s.mark_step_completed("analyze_repository");
                    Ok(())
                })
                .await
                .unwrap();
        })
    };
    let b = {
        let manager = Arc::clone(&manager);
        let id = session.id.clone();
        tokio::spawn(async move {
            manager
                .update(&id, |s| {
                    s.mark_step_completed("generate_dockerfile");
                    Ok(())
                })
                .await
                .unwrap();
        })
    };
    a.await.unwrap();
    b.await.unwrap();

    let final_state = manager.get(&session.id).await.unwrap();
    assert_eq!(final_state.completed_steps.len(), 2);
}

#[tokio::test]
async fn different_sessions_update_independently() {
    let manager = Arc::new(SessionManager::new(Arc::new(MemoryStore::new())));
    let s1 = manager.create("/repo/a").await.unwrap();
    let s2 = manager.create("/repo/b").await.unwrap();

    let mut handles = Vec::new();
    for id in [s1.id.clone(), s2.id.clone()] {
        for _ in 0..20 {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .update(&id, |s| {
                        let v = s.metadata.get("n").and_then(Value::as_i64).unwrap_or(0);
                        s.metadata.insert("n".into(), json!(v + 1));
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in [&s1.id, &s2.id] {
        let state = manager.get(id).await.unwrap();
        assert_eq!(state.metadata.get("n"), Some(&json!(20)));
    }
}

#[tokio::test]
async fn sqlite_backed_sessions_survive_manager_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("sessions.db");

    let session_id = {
        let manager = SessionManager::new(Arc::new(SqliteStore::open(&db_path).unwrap()));
        let session = manager.create("/repo/app").await.unwrap();
        manager
            .store_result(&session.id, "analyze_repository", json!({"language": "rust"}))
            .await
            .unwrap();
        session.id
    };

    // 新的管理器 + 同一数据库文件，状态完整恢复
    let manager = SessionManager::new(Arc::new(SqliteStore::open(&db_path).unwrap()));
    let restored = manager.get(&session_id).await.unwrap();
    assert_eq!(
        restored.result("analyze_repository"),
        Some(&json!({"language": "rust"}))
    );
}
