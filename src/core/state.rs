//! Worker 状态看板
//!
//! 每个角色一条记录，构造时创建、进程内不销毁；每个任务边界更新一次。
//! `reset` 清空计数与元数据但保留 id。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::workers::WorkerRole;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Thinking,
    Working,
    /// 等待恢复重试
    Waiting,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkerState {
    pub id: String,
    pub role: WorkerRole,
    pub status: WorkerStatus,
    pub current_task: Option<String>,
    pub confidence: f64,
    pub last_activity: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
    pub tasks_completed: u64,
    pub failures: u64,
}

impl WorkerState {
    fn new(role: WorkerRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            status: WorkerStatus::Idle,
            current_task: None,
            confidence: 0.0,
            last_activity: Utc::now(),
            metadata: HashMap::new(),
            tasks_completed: 0,
            failures: 0,
        }
    }

    /// 清空历史，保留身份
    pub fn reset(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current_task = None;
        self.confidence = 0.0;
        self.metadata.clear();
        self.tasks_completed = 0;
        self.failures = 0;
        self.last_activity = Utc::now();
    }
}

#[derive(Clone, Debug)]
pub struct WorkerStateBoard {
    states: Arc<RwLock<HashMap<WorkerRole, WorkerState>>>,
}

impl WorkerStateBoard {
    pub fn new(roles: impl IntoIterator<Item = WorkerRole>) -> Self {
        let states = roles.into_iter().map(|r| (r, WorkerState::new(r))).collect();
        Self {
            states: Arc::new(RwLock::new(states)),
        }
    }

    async fn update(&self, role: WorkerRole, f: impl FnOnce(&mut WorkerState)) {
        let mut states = self.states.write().await;
        let state = states.entry(role).or_insert_with(|| WorkerState::new(role));
        f(state);
        state.last_activity = Utc::now();
    }

    pub async fn begin(&self, role: WorkerRole, status: WorkerStatus, task: &str) {
        self.update(role, |s| {
            s.status = status;
            s.current_task = Some(task.to_string());
        })
        .await;
    }

    pub async fn finish(&self, role: WorkerRole, confidence: f64) {
        self.update(role, |s| {
            s.status = WorkerStatus::Idle;
            s.current_task = None;
            s.confidence = confidence;
            s.tasks_completed += 1;
        })
        .await;
    }

    pub async fn fail(&self, role: WorkerRole, reason: &str) {
        self.update(role, |s| {
            s.status = WorkerStatus::Error;
            s.failures += 1;
            s.metadata
                .insert("last_error".to_string(), Value::String(reason.to_string()));
        })
        .await;
    }

    pub async fn waiting(&self, role: WorkerRole, reason: &str) {
        self.update(role, |s| {
            s.status = WorkerStatus::Waiting;
            s.current_task = Some(reason.to_string());
        })
        .await;
    }

    pub async fn get(&self, role: WorkerRole) -> Option<WorkerState> {
        self.states.read().await.get(&role).cloned()
    }

    /// 按角色顺序的快照
    pub async fn snapshot(&self) -> Vec<WorkerState> {
        let mut all: Vec<WorkerState> = self.states.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.role);
        all
    }

    pub async fn reset(&self, role: WorkerRole) {
        if let Some(state) = self.states.write().await.get_mut(&role) {
            state.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_updates() {
        let board = WorkerStateBoard::new(WorkerRole::ALL);
        assert_eq!(board.snapshot().await.len(), 5);

        board.begin(WorkerRole::Extractor, WorkerStatus::Working, "extract inv-1").await;
        let s = board.get(WorkerRole::Extractor).await.unwrap();
        assert_eq!(s.status, WorkerStatus::Working);
        assert_eq!(s.current_task.as_deref(), Some("extract inv-1"));

        board.fail(WorkerRole::Extractor, "no text layer").await;
        board.waiting(WorkerRole::Extractor, "retry").await;
        board.finish(WorkerRole::Extractor, 0.8).await;
        let s = board.get(WorkerRole::Extractor).await.unwrap();
        assert_eq!(s.status, WorkerStatus::Idle);
        assert_eq!(s.failures, 1);
        assert_eq!(s.tasks_completed, 1);
        assert_eq!(s.metadata["last_error"], "no text layer");
    }

    #[tokio::test]
    async fn test_reset_preserves_identity() {
        let board = WorkerStateBoard::new([WorkerRole::Router]);
        let id = board.get(WorkerRole::Router).await.unwrap().id;
        board.finish(WorkerRole::Router, 0.9).await;
        board.reset(WorkerRole::Router).await;
        let s = board.get(WorkerRole::Router).await.unwrap();
        assert_eq!(s.id, id);
        assert_eq!(s.tasks_completed, 0);
        assert!(s.metadata.is_empty());
    }
}
