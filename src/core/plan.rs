//! 计划与步骤数据模型
//!
//! 计划创建后步骤数量与顺序不可变；恢复只改写某一步的输入与输出。
//! 步骤每次尝试严格遵循 Pending/Failed -> Running -> Completed|Failed。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::OrchestratorError;
use crate::workers::WorkerRole;

pub type PlanId = String;
pub type StepId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 步骤动作；每个动作对应唯一的 Worker 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Extract,
    Validate,
    Route,
}

impl StepAction {
    pub fn role(&self) -> WorkerRole {
        match self {
            StepAction::Extract => WorkerRole::Extractor,
            StepAction::Validate => WorkerRole::Validator,
            StepAction::Route => WorkerRole::Router,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Extract => "extract",
            StepAction::Validate => "validate",
            StepAction::Route => "route",
        }
    }
}

/// 复杂度分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
    Exceptional,
}

impl Complexity {
    /// 计划置信度（仅供参考，不影响执行）
    pub fn confidence(&self) -> f64 {
        match self {
            Complexity::Simple => 0.9,
            Complexity::Complex => 0.75,
            Complexity::Exceptional => 0.6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Complex => "complex",
            Complexity::Exceptional => "exceptional",
        }
    }
}

/// 步骤输出：typed 结果序列化为 JSON，外加置信度与是否经恢复得到
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    pub confidence: f64,
    #[serde(default)]
    pub recovered: bool,
    pub data: Value,
}

impl StepOutput {
    pub fn new(data: Value, confidence: f64) -> Self {
        Self {
            confidence: clamp_confidence(confidence),
            recovered: false,
            data,
        }
    }

    /// 将 typed 结果序列化为输出
    pub fn from_typed<T: Serialize>(value: &T, confidence: f64) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(value)?, confidence))
    }

    pub fn mark_recovered(mut self) -> Self {
        self.recovered = true;
        self
    }
}

/// NaN 视为 0
pub fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub worker: WorkerRole,
    pub action: StepAction,
    pub input: Value,
    pub output: Option<StepOutput>,
    pub status: StepStatus,
    pub confidence: f64,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(action: StepAction, input: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            worker: action.role(),
            action,
            input,
            output: None,
            status: StepStatus::Pending,
            confidence: 0.0,
            attempts: 0,
            timestamp: Utc::now(),
        }
    }

    fn transition(&mut self, allowed: &[StepStatus], to: StepStatus) -> Result<(), OrchestratorError> {
        if !allowed.contains(&self.status) {
            return Err(OrchestratorError::InvalidTransition {
                step: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.timestamp = Utc::now();
        Ok(())
    }

    /// 开始一次尝试（首次或恢复重试），返回尝试序号
    pub fn begin_attempt(&mut self) -> Result<u32, OrchestratorError> {
        self.transition(&[StepStatus::Pending, StepStatus::Failed], StepStatus::Running)?;
        self.attempts += 1;
        Ok(self.attempts)
    }

    pub fn complete(&mut self, output: StepOutput) -> Result<(), OrchestratorError> {
        self.transition(&[StepStatus::Running], StepStatus::Completed)?;
        self.confidence = output.confidence;
        self.output = Some(output);
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), OrchestratorError> {
        self.transition(&[StepStatus::Running], StepStatus::Failed)
    }

    /// 恢复时改写输入（仅允许在失败后）
    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub subject_id: String,
    steps: Vec<Step>,
    pub status: PlanStatus,
    pub complexity: Complexity,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(
        subject_id: impl Into<String>,
        complexity: Complexity,
        steps: Vec<Step>,
        reasoning: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            steps,
            status: PlanStatus::Planning,
            complexity,
            reasoning: reasoning.into(),
            confidence: complexity.confidence(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.updated_at = Utc::now();
        self.steps.get_mut(index)
    }

    pub fn actions(&self) -> Vec<StepAction> {
        self.steps.iter().map(|s| s.action).collect()
    }

    pub fn mark_executing(&mut self) {
        self.set_status(PlanStatus::Executing);
    }

    pub fn mark_completed(&mut self) {
        self.set_status(PlanStatus::Completed);
    }

    pub fn mark_failed(&mut self) {
        self.set_status(PlanStatus::Failed);
    }

    fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, PlanStatus::Completed | PlanStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_lifecycle() {
        let mut step = Step::new(StepAction::Validate, json!({"level": "basic"}));
        assert_eq!(step.worker, WorkerRole::Validator);
        assert_eq!(step.begin_attempt().unwrap(), 1);
        step.fail().unwrap();
        assert_eq!(step.begin_attempt().unwrap(), 2);
        step.complete(StepOutput::new(json!({}), 0.8).mark_recovered())
            .unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.output.as_ref().unwrap().recovered);
        assert!((step.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_step_rejects_invalid_transitions() {
        let mut step = Step::new(StepAction::Route, json!({}));
        assert!(matches!(
            step.complete(StepOutput::new(json!({}), 1.0)),
            Err(OrchestratorError::InvalidTransition { .. })
        ));
        assert!(step.fail().is_err());
        step.begin_attempt().unwrap();
        assert!(step.begin_attempt().is_err());
        step.complete(StepOutput::new(json!({}), 1.0)).unwrap();
        assert!(step.begin_attempt().is_err());
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(StepOutput::new(json!(null), 1.7).confidence, 1.0);
        assert_eq!(StepOutput::new(json!(null), -0.2).confidence, 0.0);
        assert_eq!(StepOutput::new(json!(null), f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_plan_confidence_by_complexity() {
        let plan = Plan::new("inv-1", Complexity::Complex, vec![], "test");
        assert_eq!(plan.confidence, 0.75);
        assert_eq!(plan.status, PlanStatus::Planning);
        assert!(!plan.is_terminal());
    }

    #[test]
    fn test_plan_serializes_steps() {
        let plan = Plan::new(
            "inv-1",
            Complexity::Simple,
            vec![Step::new(StepAction::Extract, json!({"method": "pdf_text"}))],
            "simple",
        );
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["steps"][0]["action"], "extract");
        assert_eq!(value["steps"][0]["worker"], "extractor");
        assert_eq!(value["complexity"], "simple");
    }
}
