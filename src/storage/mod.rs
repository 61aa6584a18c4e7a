//! 持久化契约
//!
//! 编排器只依赖 `SubjectStore` trait：读取发票、写入步骤活动记录、更新最终状态、
//! 列出待处理发票（供轮询器使用）。活动记录写入失败不影响计划；状态更新失败对 process_stored 致命。

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::result::ProcessingResult;
use crate::invoice::Invoice;
use crate::workers::RouteAction;

pub use memory::InMemorySubjectStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Subject not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// 发票处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Approved,
    AwaitingApproval,
    ManualReview,
    Rejected,
}

impl ProcessingStatus {
    /// 由处理结果推出终态；降级结果一律人工复核
    pub fn from_result(result: &ProcessingResult) -> Self {
        if result.is_degraded() {
            return ProcessingStatus::ManualReview;
        }
        match result.workflow.route {
            RouteAction::AutoApprove => ProcessingStatus::Approved,
            RouteAction::ManagerApproval | RouteAction::ExecutiveApproval => {
                ProcessingStatus::AwaitingApproval
            }
            RouteAction::ManualReview => ProcessingStatus::ManualReview,
            RouteAction::Reject => ProcessingStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Approved => "approved",
            ProcessingStatus::AwaitingApproval => "awaiting_approval",
            ProcessingStatus::ManualReview => "manual_review",
            ProcessingStatus::Rejected => "rejected",
        }
    }
}

/// 单步活动记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub plan_id: Option<String>,
    pub subject_id: String,
    pub step: String,
    pub worker: String,
    /// started / completed / failed / recovered / drafted
    pub status: String,
    pub confidence: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        plan_id: Option<&str>,
        subject_id: &str,
        step: &str,
        worker: &str,
        status: &str,
    ) -> Self {
        Self {
            plan_id: plan_id.map(str::to_string),
            subject_id: subject_id.to_string(),
            step: step.to_string(),
            worker: worker.to_string(),
            status: status.to_string(),
            confidence: 0.0,
            message: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ProcessingStatus,
    pub route: Option<RouteAction>,
    pub confidence: f64,
    pub approval_required: bool,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: ProcessingStatus::Processing,
            route: None,
            confidence: 0.0,
            approval_required: false,
        }
    }

    pub fn from_result(result: &ProcessingResult) -> Self {
        Self {
            status: ProcessingStatus::from_result(result),
            route: Some(result.workflow.route),
            confidence: result.confidence,
            approval_required: result.workflow.approval_required,
        }
    }
}

#[async_trait]
pub trait SubjectStore: Send + Sync {
    async fn get_invoice(&self, id: &str) -> Result<Invoice, StorageError>;

    async fn save_step_activity(&self, record: ActivityRecord) -> Result<(), StorageError>;

    async fn update_invoice_status(&self, id: &str, update: StatusUpdate) -> Result<(), StorageError>;

    /// 待处理发票，按入库顺序，最多 limit 条
    async fn pending(&self, limit: usize) -> Result<Vec<Invoice>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_degraded_result() {
        let result = ProcessingResult::degraded("inv-1", None, "s", "boom", 1);
        assert_eq!(ProcessingStatus::from_result(&result), ProcessingStatus::ManualReview);
        let update = StatusUpdate::from_result(&result);
        assert_eq!(update.route, Some(RouteAction::ManualReview));
        assert!(update.approval_required);
    }

    #[test]
    fn test_activity_builder() {
        let record = ActivityRecord::new(Some("p"), "inv-1", "extract", "document_extractor", "completed")
            .with_confidence(0.9)
            .with_message("ok");
        assert_eq!(record.plan_id.as_deref(), Some("p"));
        assert_eq!(record.confidence, 0.9);
        assert_eq!(serde_json::to_value(ProcessingStatus::AwaitingApproval).unwrap(), "awaiting_approval");
    }
}
