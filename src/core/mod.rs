//! 核心编排层：计划模型、上下文、步骤执行与恢复、事件、状态看板、主控循环

pub mod builder;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod recovery;
pub mod result;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use context::TaskContext;
pub use error::OrchestratorError;
pub use events::{EventBus, OrchestratorEvent};
pub use executor::StepExecutor;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use plan::{Complexity, Plan, PlanId, PlanStatus, Step, StepAction, StepId, StepOutput, StepStatus};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use result::{
    InsightSummary, ProcessingResult, ResultStatus, ValidationSummary, WorkflowSummary,
    DEGRADED_CONFIDENCE, MANUAL_REVIEW_ISSUE,
};
pub use state::{WorkerState, WorkerStateBoard, WorkerStatus};
