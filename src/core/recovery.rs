//! 步骤级错误恢复
//!
//! 根据失败步骤的动作决定恢复方式：抽取换用未尝试过的策略，校验降低严格程度，
//! 其余步骤合成低置信度占位结果（recovered = true）。不可恢复的错误直接终止。

use serde_json::{json, Value};

use crate::core::context::TaskContext;
use crate::core::error::OrchestratorError;
use crate::core::plan::{Step, StepAction, StepOutput};
use crate::workers::extractor::{choose_strategy, parse_input as parse_extract_input};
use crate::workers::{ExtractionStrategy, RoutingDecision, ValidationLevel, WorkerError};

/// 恢复引擎给出的动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 带上已尝试策略重试抽取，由 Extractor 自行挑选下一个策略
    RetryWithAlternateStrategy { tried: Vec<ExtractionStrategy> },
    /// 以降低后的级别重试校验
    RetryWithReducedStrictness { level: ValidationLevel },
    /// 合成占位结果
    Placeholder,
    /// 终止当前计划
    Abort(String),
}

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn plan_recovery(
        &self,
        step: &Step,
        err: &OrchestratorError,
        ctx: &TaskContext,
    ) -> RecoveryAction {
        if !err.is_recoverable() {
            return RecoveryAction::Abort(err.reason());
        }
        match step.action {
            StepAction::Extract => {
                let (method, mut tried) = match parse_extract_input(&step.input) {
                    Ok(parsed) => parsed,
                    Err(e) => return RecoveryAction::Abort(e.to_string()),
                };
                // 失败的那次尝试所用策略：错误里有就用，否则按同样的偏好顺序推出
                let failed = match err {
                    OrchestratorError::WorkerExecution {
                        source: WorkerError::StrategiesExhausted(_),
                        ..
                    } => return RecoveryAction::Abort("no extraction strategy left".to_string()),
                    OrchestratorError::WorkerExecution {
                        source: WorkerError::StrategyFailed { strategy, .. },
                        ..
                    } => Some(*strategy),
                    _ => choose_strategy(&ctx.invoice.document, method, &tried),
                };
                if let Some(s) = failed {
                    if !tried.contains(&s) {
                        tried.push(s);
                    }
                }
                if choose_strategy(&ctx.invoice.document, method, &tried).is_none() {
                    return RecoveryAction::Abort(format!(
                        "no extraction strategy left after {tried:?}"
                    ));
                }
                RecoveryAction::RetryWithAlternateStrategy { tried }
            }
            StepAction::Validate => {
                let level: ValidationLevel = step
                    .input
                    .get("level")
                    .and_then(|l| serde_json::from_value(l.clone()).ok())
                    .unwrap_or(ValidationLevel::Basic);
                let reduced = level.reduced();
                if reduced == level {
                    RecoveryAction::Abort(format!("validation already at {} level", level.as_str()))
                } else {
                    RecoveryAction::RetryWithReducedStrictness { level: reduced }
                }
            }
            StepAction::Route => RecoveryAction::Placeholder,
        }
    }

    /// 依据恢复动作改写步骤输入
    pub fn retry_input(&self, step: &Step, action: &RecoveryAction) -> Value {
        let mut input = match &step.input {
            Value::Object(_) => step.input.clone(),
            _ => json!({}),
        };
        match action {
            RecoveryAction::RetryWithAlternateStrategy { tried } => {
                input["tried_strategies"] = json!(tried);
                input["retry"] = json!(true);
            }
            RecoveryAction::RetryWithReducedStrictness { level } => {
                input["level"] = json!(level);
                input["retry"] = json!(true);
            }
            RecoveryAction::Placeholder | RecoveryAction::Abort(_) => {}
        }
        input
    }

    /// 合成占位输出；仅路由步骤有占位语义
    pub fn placeholder(
        &self,
        action: StepAction,
        reason: &str,
    ) -> Result<StepOutput, OrchestratorError> {
        match action {
            StepAction::Route => {
                let decision = RoutingDecision::manual_fallback(format!(
                    "routing unavailable ({reason}), defaulting to manual review"
                ));
                StepOutput::from_typed(&decision, decision.confidence)
                    .map(StepOutput::mark_recovered)
                    .map_err(|e| OrchestratorError::RecoveryExhausted {
                        action,
                        reason: e.to_string(),
                    })
            }
            other => Err(OrchestratorError::RecoveryExhausted {
                action: other,
                reason: format!("no placeholder for {}", other.as_str()),
            }),
        }
    }
}
