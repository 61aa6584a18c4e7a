//! Worker 抽象与注册表
//!
//! 每个步骤 Worker 实现 `Worker` trait（role / run），由 WorkerRegistry 按角色注册与查找；
//! 注册表构建时检查 Extract / Validate / Route 三个必需角色是否齐全。

pub mod communicator;
pub mod extractor;
pub mod flavor;
pub mod planner;
pub mod router;
pub mod validator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::context::TaskContext;
use crate::core::error::OrchestratorError;
use crate::core::plan::{StepAction, StepOutput};

pub use communicator::{CommunicationWorker, DraftMessage, MessageKind};
pub use extractor::{ExtractedFields, ExtractionMethod, ExtractionResult, ExtractionStrategy, ExtractorWorker};
pub use flavor::{NoFlavor, ReasoningFlavor, SimulatedFlavor};
pub use planner::CoordinatorWorker;
pub use router::{ApprovalPriority, RouteAction, RouterWorker, RoutingBasis, RoutingDecision};
pub use validator::{RiskTier, ValidationLevel, ValidationResult, ValidatorWorker};

/// Worker 角色（封闭枚举）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Coordinator,
    Extractor,
    Validator,
    Router,
    Communicator,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 5] = [
        WorkerRole::Coordinator,
        WorkerRole::Extractor,
        WorkerRole::Validator,
        WorkerRole::Router,
        WorkerRole::Communicator,
    ];

    /// 计划步骤必需的角色
    pub const REQUIRED: [WorkerRole; 3] =
        [WorkerRole::Extractor, WorkerRole::Validator, WorkerRole::Router];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Coordinator => "coordinator",
            WorkerRole::Extractor => "document_extractor",
            WorkerRole::Validator => "validator",
            WorkerRole::Router => "workflow_router",
            WorkerRole::Communicator => "communicator",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker 级错误；由 StepExecutor 包装为 OrchestratorError::WorkerExecution
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("Extraction strategy {strategy} failed: {reason}")]
    StrategyFailed {
        strategy: ExtractionStrategy,
        reason: String,
    },

    #[error("All extraction strategies exhausted (tried: {0:?})")]
    StrategiesExhausted(Vec<ExtractionStrategy>),

    #[error("Invalid step input: {0}")]
    InvalidInput(String),

    #[error("Missing upstream result from {0}")]
    MissingUpstream(WorkerRole),

    #[error("Unsupported action {action:?} for {role}")]
    UnsupportedAction { role: WorkerRole, action: StepAction },

    #[error("{0}")]
    Failed(String),
}

/// 步骤 Worker：接收步骤输入与上下文，返回带置信度的输出
#[async_trait]
pub trait Worker: Send + Sync {
    fn role(&self) -> WorkerRole;

    fn name(&self) -> &str {
        self.role().as_str()
    }

    async fn run(
        &self,
        action: StepAction,
        input: &Value,
        ctx: &TaskContext,
    ) -> Result<StepOutput, WorkerError>;
}

/// 按角色存储 Arc<dyn Worker>
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerRole, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn builder() -> WorkerRegistryBuilder {
        WorkerRegistryBuilder::default()
    }

    pub fn get(&self, role: WorkerRole) -> Option<Arc<dyn Worker>> {
        self.workers.get(&role).cloned()
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        let mut roles: Vec<WorkerRole> = self.workers.keys().copied().collect();
        roles.sort();
        roles
    }
}

#[derive(Default)]
pub struct WorkerRegistryBuilder {
    workers: HashMap<WorkerRole, Arc<dyn Worker>>,
}

impl WorkerRegistryBuilder {
    /// 注册 Worker；同角色后注册者覆盖
    pub fn register(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(worker.role(), worker);
        self
    }

    /// 构建并检查必需角色是否齐全
    pub fn build(self) -> Result<WorkerRegistry, OrchestratorError> {
        let missing: Vec<WorkerRole> = WorkerRole::REQUIRED
            .into_iter()
            .filter(|r| !self.workers.contains_key(r))
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::IncompleteRegistry(missing));
        }
        Ok(self.build_unchecked())
    }

    /// 跳过完整性检查（缺失角色在执行时表现为 UnknownWorker）
    pub fn build_unchecked(self) -> WorkerRegistry {
        WorkerRegistry {
            workers: self.workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(WorkerRole);

    #[async_trait]
    impl Worker for Echo {
        fn role(&self) -> WorkerRole {
            self.0
        }

        async fn run(
            &self,
            _action: StepAction,
            input: &Value,
            _ctx: &TaskContext,
        ) -> Result<StepOutput, WorkerError> {
            Ok(StepOutput::new(input.clone(), 1.0))
        }
    }

    #[test]
    fn test_role_names() {
        assert_eq!(WorkerRole::Extractor.as_str(), "document_extractor");
        assert_eq!(WorkerRole::Router.to_string(), "workflow_router");
    }

    #[test]
    fn test_registry_completeness_check() {
        let err = WorkerRegistry::builder()
            .register(Arc::new(Echo(WorkerRole::Extractor)))
            .build()
            .err()
            .unwrap();
        match err {
            OrchestratorError::IncompleteRegistry(missing) => {
                assert_eq!(missing, vec![WorkerRole::Validator, WorkerRole::Router]);
            }
            other => panic!("Expected IncompleteRegistry, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_register_replaces_same_role() {
        let registry = WorkerRegistry::builder()
            .register(Arc::new(Echo(WorkerRole::Extractor)))
            .register(Arc::new(Echo(WorkerRole::Validator)))
            .register(Arc::new(Echo(WorkerRole::Router)))
            .register(Arc::new(Echo(WorkerRole::Router)))
            .build()
            .unwrap();
        assert_eq!(
            registry.roles(),
            vec![WorkerRole::Extractor, WorkerRole::Validator, WorkerRole::Router]
        );
        assert!(registry.get(WorkerRole::Communicator).is_none());
    }

    #[test]
    fn test_build_unchecked_allows_gaps() {
        let registry = WorkerRegistry::builder()
            .register(Arc::new(Echo(WorkerRole::Extractor)))
            .build_unchecked();
        assert!(registry.get(WorkerRole::Validator).is_none());
    }
}
