//! 编排生命周期事件
//!
//! 通过构造时传入的 broadcast 通道发布；发送是非阻塞、尽力而为的，没有订阅者时直接丢弃。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::plan::{Complexity, PlanId, StepAction, StepId};
use crate::core::result::ProcessingResult;
use crate::workers::WorkerRole;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    ProcessingStarted {
        subject_id: String,
        session_id: String,
    },
    PlanCreated {
        plan_id: PlanId,
        subject_id: String,
        complexity: Complexity,
        confidence: f64,
        steps: Vec<StepAction>,
    },
    StepStarted {
        plan_id: PlanId,
        step_id: StepId,
        action: StepAction,
        worker: WorkerRole,
        attempt: u32,
    },
    StepCompleted {
        plan_id: PlanId,
        step_id: StepId,
        action: StepAction,
        confidence: f64,
        recovered: bool,
    },
    StepFailed {
        plan_id: PlanId,
        step_id: StepId,
        action: StepAction,
        error: String,
        recoverable: bool,
    },
    ProcessingCompleted {
        subject_id: String,
        plan_id: PlanId,
        result: Box<ProcessingResult>,
    },
    ProcessingError {
        subject_id: String,
        plan_id: Option<PlanId>,
        error: String,
        result: Box<ProcessingResult>,
    },
}

impl OrchestratorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorEvent::ProcessingStarted { .. } => "processing_started",
            OrchestratorEvent::PlanCreated { .. } => "plan_created",
            OrchestratorEvent::StepStarted { .. } => "step_started",
            OrchestratorEvent::StepCompleted { .. } => "step_completed",
            OrchestratorEvent::StepFailed { .. } => "step_failed",
            OrchestratorEvent::ProcessingCompleted { .. } => "processing_completed",
            OrchestratorEvent::ProcessingError { .. } => "processing_error",
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            OrchestratorEvent::ProcessingStarted { subject_id, .. }
            | OrchestratorEvent::PlanCreated { subject_id, .. }
            | OrchestratorEvent::ProcessingCompleted { subject_id, .. }
            | OrchestratorEvent::ProcessingError { subject_id, .. } => Some(subject_id.as_str()),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorEvent::ProcessingCompleted { .. } | OrchestratorEvent::ProcessingError { .. }
        )
    }
}

/// 事件总线：可克隆，多个编排器可共享
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = OrchestratorEvent::StepStarted {
            plan_id: "p".into(),
            step_id: "s".into(),
            action: StepAction::Validate,
            worker: WorkerRole::Validator,
            attempt: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step_started");
        assert_eq!(value["action"], "validate");
        assert_eq!(value["attempt"], 2);
        assert_eq!(event.kind(), "step_started");
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.emit(OrchestratorEvent::ProcessingStarted {
            subject_id: "a".into(),
            session_id: "s".into(),
        });
        let mut rx = bus.subscribe();
        bus.emit(OrchestratorEvent::ProcessingStarted {
            subject_id: "b".into(),
            session_id: "s".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject_id(), Some("b"));
        assert_eq!(bus.receiver_count(), 1);
    }
}
