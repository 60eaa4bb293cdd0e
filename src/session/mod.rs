//! 会话状态存储
//!
//! 跨进程可恢复性只依赖外部持久化的会话状态与计划，内存状态不假设持久。
//! 契约：每次 save 递增内部版本号并刷新更新时间（last-write-wins）；
//! 同一 session id 的并发写协调由调用方负责。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// 会话状态存储契约
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 保存状态；返回是否成功。实现必须递增版本号并刷新更新时间
    async fn save_state(&self, session_id: &str, state: Value) -> bool;

    /// 读取状态；不存在返回 None
    async fn load_state(&self, session_id: &str) -> Option<Value>;

    /// 删除状态
    async fn delete_state(&self, session_id: &str);

    /// 列出所有会话 id
    async fn list_sessions(&self) -> Vec<String>;
}

#[derive(Clone, Debug)]
struct StoredState {
    data: Value,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// 内存实现：带版本号与更新时间戳
#[derive(Default)]
pub struct MemorySessionStore {
    states: Mutex<HashMap<String, StoredState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前版本号（测试与诊断用）
    pub fn version_of(&self, session_id: &str) -> Option<u64> {
        self.states
            .lock()
            .expect("session store lock")
            .get(session_id)
            .map(|s| s.version)
    }

    /// 最近一次保存时间
    pub fn updated_at_of(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.states
            .lock()
            .expect("session store lock")
            .get(session_id)
            .map(|s| s.updated_at)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save_state(&self, session_id: &str, state: Value) -> bool {
        let mut states = self.states.lock().expect("session store lock");
        let version = states.get(session_id).map(|s| s.version + 1).unwrap_or(1);
        states.insert(
            session_id.to_string(),
            StoredState {
                data: state,
                version,
                updated_at: Utc::now(),
            },
        );
        true
    }

    async fn load_state(&self, session_id: &str) -> Option<Value> {
        self.states
            .lock()
            .expect("session store lock")
            .get(session_id)
            .map(|s| s.data.clone())
    }

    async fn delete_state(&self, session_id: &str) {
        self.states
            .lock()
            .expect("session store lock")
            .remove(session_id);
    }

    async fn list_sessions(&self) -> Vec<String> {
        self.states
            .lock()
            .expect("session store lock")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_increments_version_and_timestamp() {
        let store = MemorySessionStore::new();
        assert!(store.save_state("s1", json!({"a": 1})).await);
        assert_eq!(store.version_of("s1"), Some(1));
        let first = store.updated_at_of("s1").unwrap();

        assert!(store.save_state("s1", json!({"a": 2})).await);
        assert_eq!(store.version_of("s1"), Some(2));
        assert!(store.updated_at_of("s1").unwrap() >= first);
        assert_eq!(store.load_state("s1").await, Some(json!({"a": 2})));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemorySessionStore::new();
        store.save_state("s1", json!({})).await;
        store.save_state("s2", json!({})).await;
        let mut sessions = store.list_sessions().await;
        sessions.sort();
        assert_eq!(sessions, vec!["s1", "s2"]);

        store.delete_state("s1").await;
        assert!(store.load_state("s1").await.is_none());
    }
}
