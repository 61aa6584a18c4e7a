//! 编排错误类型
//!
//! StepTimeout / WorkerExecution 可恢复，交给 RecoveryEngine；其余对计划致命。

use thiserror::Error;

use crate::core::plan::{StepAction, StepId, StepStatus};
use crate::rules::RuleError;
use crate::storage::StorageError;
use crate::workers::{WorkerError, WorkerRole};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerRole),

    #[error("Step {action:?} timed out after {timeout_ms}ms")]
    StepTimeout { action: StepAction, timeout_ms: u64 },

    #[error("Worker {worker} failed: {source}")]
    WorkerExecution {
        worker: WorkerRole,
        #[source]
        source: WorkerError,
    },

    #[error("Recovery exhausted for {action:?}: {reason}")]
    RecoveryExhausted { action: StepAction, reason: String },

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Worker registry incomplete, missing: {0:?}")]
    IncompleteRegistry(Vec<WorkerRole>),

    #[error("Invalid step transition for {step}: {from:?} -> {to:?}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Config error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// 是否交给恢复流程处理
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::StepTimeout { .. } | OrchestratorError::WorkerExecution { .. }
        )
    }

    /// 事件与活动记录里使用的简短原因
    pub fn reason(&self) -> String {
        match self {
            OrchestratorError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(OrchestratorError::StepTimeout {
            action: StepAction::Extract,
            timeout_ms: 10
        }
        .is_recoverable());
        assert!(OrchestratorError::WorkerExecution {
            worker: WorkerRole::Validator,
            source: WorkerError::Failed("boom".into()),
        }
        .is_recoverable());
        assert!(!OrchestratorError::UnknownWorker(WorkerRole::Router).is_recoverable());
        assert!(!OrchestratorError::Cancelled.is_recoverable());
        assert!(!OrchestratorError::RecoveryExhausted {
            action: StepAction::Route,
            reason: "x".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = OrchestratorError::WorkerExecution {
            worker: WorkerRole::Extractor,
            source: WorkerError::Failed("no text layer".into()),
        };
        assert_eq!(err.to_string(), "Worker document_extractor failed: no text layer");
        assert_eq!(OrchestratorError::Cancelled.reason(), "cancelled");
    }
}
