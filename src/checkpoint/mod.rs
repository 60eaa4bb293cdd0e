//! 工作流检查点：暂停 / 恢复原语
//!
//! 策略阻塞在外部或人工输入时创建检查点；在 resume 之前由检查点存储独占
//! 持有；一次性——已恢复的检查点不可再次恢复。resume 协议违规（未知 run、
//! 状态错误、缺少必填键）是调用方的协议错误，同步返回。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;

/// 检查点状态：waiting_external → resumed（终态，一次性）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    WaitingExternal,
    Resumed,
}

/// 恢复所需输入的键 schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequiredInputs {
    #[serde(default)]
    pub required: Vec<String>,
}

/// 检查点记录；state 为调用方拥有的不透明载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub run_id: String,
    pub session_id: String,
    pub workflow_name: String,
    pub node_id: String,
    pub status: CheckpointStatus,
    pub blocking_reason: String,
    pub required_inputs: RequiredInputs,
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 检查点存储契约：JSON 可序列化载荷
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), EngineError>;

    async fn get(&self, run_id: &str) -> Option<WorkflowCheckpoint>;

    async fn list_waiting(&self) -> Vec<WorkflowCheckpoint>;
}

#[async_trait]
impl CheckpointStore for std::sync::Arc<dyn CheckpointStore> {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), EngineError> {
        (**self).save(checkpoint).await
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowCheckpoint> {
        (**self).get(run_id).await
    }

    async fn list_waiting(&self) -> Vec<WorkflowCheckpoint> {
        (**self).list_waiting().await
    }
}

/// 内存实现
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, WorkflowCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), EngineError> {
        self.checkpoints
            .lock()
            .expect("checkpoint store lock")
            .insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowCheckpoint> {
        self.checkpoints
            .lock()
            .expect("checkpoint store lock")
            .get(run_id)
            .cloned()
    }

    async fn list_waiting(&self) -> Vec<WorkflowCheckpoint> {
        self.checkpoints
            .lock()
            .expect("checkpoint store lock")
            .values()
            .filter(|c| c.status == CheckpointStatus::WaitingExternal)
            .cloned()
            .collect()
    }
}

/// JSON 文件实现：每个 run 一个文件，格式即 WorkflowCheckpoint 的 serde 形态
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        // run_id 来自 uuid，无路径分隔符；仍做一次保守过滤
        let safe: String = run_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn save(&self, checkpoint: WorkflowCheckpoint) -> Result<(), EngineError> {
        let path = self.path_for(&checkpoint.run_id);
        let json = serde_json::to_string_pretty(&checkpoint)
            .map_err(|e| EngineError::Validation(format!("serialize checkpoint: {}", e)))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::Validation(format!("create checkpoint dir: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| EngineError::Validation(format!("write checkpoint: {}", e)))
    }

    async fn get(&self, run_id: &str) -> Option<WorkflowCheckpoint> {
        let bytes = tokio::fs::read(self.path_for(run_id)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn list_waiting(&self) -> Vec<WorkflowCheckpoint> {
        let mut result = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return result;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(bytes) = tokio::fs::read(entry.path()).await {
                if let Ok(cp) = serde_json::from_slice::<WorkflowCheckpoint>(&bytes) {
                    if cp.status == CheckpointStatus::WaitingExternal {
                        result.push(cp);
                    }
                }
            }
        }
        result
    }
}

/// 检查点管理：创建等待检查点与一次性恢复
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 创建并持久化等待外部输入的检查点
    #[allow(clippy::too_many_arguments)]
    pub async fn create_wait_checkpoint(
        &self,
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        workflow_name: impl Into<String>,
        node_id: impl Into<String>,
        blocking_reason: impl Into<String>,
        required_inputs: RequiredInputs,
        state: Value,
        question: Option<String>,
    ) -> Result<WorkflowCheckpoint, EngineError> {
        let now = Utc::now();
        let checkpoint = WorkflowCheckpoint {
            run_id: run_id.into(),
            session_id: session_id.into(),
            workflow_name: workflow_name.into(),
            node_id: node_id.into(),
            status: CheckpointStatus::WaitingExternal,
            blocking_reason: blocking_reason.into(),
            required_inputs,
            state,
            question,
            created_at: now,
            updated_at: now,
        };
        self.store.save(checkpoint.clone()).await?;
        Ok(checkpoint)
    }

    /// 恢复：校验存在性、状态与必填键；成功则把事件并入 state 并翻转状态
    pub async fn resume(
        &self,
        run_id: &str,
        event: Value,
    ) -> Result<WorkflowCheckpoint, EngineError> {
        let mut checkpoint = self
            .store
            .get(run_id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("run {}", run_id)))?;

        if checkpoint.status != CheckpointStatus::WaitingExternal {
            return Err(EngineError::Validation(format!(
                "run {} is not waiting for external input",
                run_id
            )));
        }

        let missing: Vec<&String> = checkpoint
            .required_inputs
            .required
            .iter()
            .filter(|key| event.get(key.as_str()).is_none())
            .collect();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            return Err(EngineError::Validation(format!(
                "resume event missing required keys: {}",
                names.join(", ")
            )));
        }

        if !checkpoint.state.is_object() {
            checkpoint.state = Value::Object(Default::default());
        }
        let state = checkpoint.state.as_object_mut().expect("state is object");
        state.insert("latest_resume_event".to_string(), event.clone());
        let history = state
            .entry("resume_events".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(history) = history.as_array_mut() {
            history.push(event);
        }

        checkpoint.status = CheckpointStatus::Resumed;
        checkpoint.updated_at = Utc::now();
        self.store.save(checkpoint.clone()).await?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn waiting_manager() -> CheckpointManager<MemoryCheckpointStore> {
        let mgr = CheckpointManager::new(MemoryCheckpointStore::new());
        mgr.create_wait_checkpoint(
            "run-1",
            "sess-1",
            "approval",
            "ask_user",
            "needs human answer",
            RequiredInputs {
                required: vec!["answer".to_string()],
            },
            json!({}),
            Some("Proceed?".to_string()),
        )
        .await
        .unwrap();
        mgr
    }

    #[tokio::test]
    async fn test_resume_unknown_run_is_not_found() {
        let mgr = CheckpointManager::new(MemoryCheckpointStore::new());
        assert!(matches!(
            mgr.resume("nope", json!({})).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_missing_key_named_in_error() {
        let mgr = waiting_manager().await;
        match mgr.resume("run-1", json!({"other": 1})).await {
            Err(EngineError::Validation(msg)) => assert!(msg.contains("answer")),
            other => panic!("expected validation error, got {:?}", other.map(|c| c.status)),
        }
    }

    #[tokio::test]
    async fn test_resume_is_one_shot() {
        let mgr = waiting_manager().await;
        let cp = mgr.resume("run-1", json!({"answer": "yes"})).await.unwrap();
        assert_eq!(cp.status, CheckpointStatus::Resumed);
        assert_eq!(cp.state["latest_resume_event"]["answer"], "yes");
        assert_eq!(cp.state["resume_events"].as_array().unwrap().len(), 1);

        match mgr.resume("run-1", json!({"answer": "again"})).await {
            Err(EngineError::Validation(msg)) => assert!(msg.contains("not waiting")),
            other => panic!("expected validation error, got {:?}", other.map(|c| c.status)),
        }
    }

    #[tokio::test]
    async fn test_list_waiting_excludes_resumed() {
        let mgr = waiting_manager().await;
        assert_eq!(mgr.store().list_waiting().await.len(), 1);
        mgr.resume("run-1", json!({"answer": "yes"})).await.unwrap();
        assert!(mgr.store().list_waiting().await.is_empty());
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(JsonFileCheckpointStore::new(dir.path()));
        mgr.create_wait_checkpoint(
            "run-9",
            "sess-9",
            "wf",
            "node",
            "blocked",
            RequiredInputs { required: vec!["k".into()] },
            json!({"cursor": 3}),
            None,
        )
        .await
        .unwrap();

        assert_eq!(mgr.store().list_waiting().await.len(), 1);
        let cp = mgr.resume("run-9", json!({"k": true})).await.unwrap();
        assert_eq!(cp.status, CheckpointStatus::Resumed);
        assert!(mgr.store().list_waiting().await.is_empty());
    }
}
