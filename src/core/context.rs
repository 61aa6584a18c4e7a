//! 任务上下文：随计划执行逐步累积前序步骤输出

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::plan::StepOutput;
use crate::invoice::Invoice;
use crate::workers::{ExtractionResult, RoutingDecision, ValidationResult, WorkerRole};

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub subject_id: String,
    pub session_id: String,
    pub invoice: Arc<Invoice>,
    pub metadata: HashMap<String, Value>,
    previous: HashMap<WorkerRole, StepOutput>,
}

impl TaskContext {
    pub fn new(invoice: Arc<Invoice>) -> Self {
        Self {
            subject_id: invoice.id.clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
            invoice,
            metadata: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 记录某角色的最新输出（重试会覆盖）
    pub fn record(&mut self, role: WorkerRole, output: StepOutput) {
        self.previous.insert(role, output);
    }

    pub fn previous(&self, role: WorkerRole) -> Option<&StepOutput> {
        self.previous.get(&role)
    }

    fn typed<T: DeserializeOwned>(&self, role: WorkerRole) -> Option<T> {
        self.previous
            .get(&role)
            .and_then(|out| serde_json::from_value(out.data.clone()).ok())
    }

    pub fn extraction(&self) -> Option<ExtractionResult> {
        self.typed(WorkerRole::Extractor)
    }

    pub fn validation(&self) -> Option<ValidationResult> {
        self.typed(WorkerRole::Validator)
    }

    pub fn routing(&self) -> Option<RoutingDecision> {
        self.typed(WorkerRole::Router)
    }

    /// 已完成步骤的平均置信度
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.previous.is_empty() {
            return None;
        }
        let sum: f64 = self.previous.values().map(|o| o.confidence).sum();
        Some(sum / self.previous.len() as f64)
    }

    /// 经恢复得到输出的角色
    pub fn recovered_roles(&self) -> Vec<WorkerRole> {
        let mut roles: Vec<WorkerRole> = self
            .previous
            .iter()
            .filter(|(_, o)| o.recovered)
            .map(|(r, _)| *r)
            .collect();
        roles.sort();
        roles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{TrustLevel, Vendor};
    use serde_json::json;

    fn ctx() -> TaskContext {
        TaskContext::new(Arc::new(Invoice::new(
            "inv-1",
            "N-1",
            Vendor::new("v1", "Acme", TrustLevel::High),
            100.0,
        )))
    }

    #[test]
    fn test_record_and_mean_confidence() {
        let mut ctx = ctx();
        assert_eq!(ctx.subject_id, "inv-1");
        assert!(ctx.mean_confidence().is_none());
        ctx.record(WorkerRole::Extractor, StepOutput::new(json!({}), 0.8));
        ctx.record(WorkerRole::Validator, StepOutput::new(json!({}), 0.6).mark_recovered());
        assert!((ctx.mean_confidence().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(ctx.recovered_roles(), vec![WorkerRole::Validator]);
    }

    #[test]
    fn test_typed_access_tolerates_foreign_data() {
        let mut ctx = ctx();
        ctx.record(WorkerRole::Extractor, StepOutput::new(json!({"unexpected": true}), 0.5));
        assert!(ctx.extraction().is_none());
        assert!(ctx.previous(WorkerRole::Extractor).is_some());
    }
}
