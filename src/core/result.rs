//! 处理结果聚合

use serde::{Deserialize, Serialize};

use crate::core::context::TaskContext;
use crate::core::plan::PlanId;
use crate::rules::RuleAction;
use crate::workers::{ApprovalPriority, ExtractedFields, RiskTier, RouteAction};

/// 降级结果的置信度
pub const DEGRADED_CONFIDENCE: f64 = 0.1;
pub const MANUAL_REVIEW_ISSUE: &str = "manual review required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    /// 计划失败，结果为保守的人工复核
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub confidence: f64,
    pub risk: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub route: RouteAction,
    pub actions: Vec<RuleAction>,
    pub approval_required: bool,
    pub priority: ApprovalPriority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightSummary {
    pub patterns: Vec<String>,
    pub recommendations: Vec<String>,
    pub learnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub subject_id: String,
    pub plan_id: Option<PlanId>,
    pub session_id: String,
    pub status: ResultStatus,
    pub extracted_data: Option<ExtractedFields>,
    pub validation: ValidationSummary,
    pub workflow: WorkflowSummary,
    pub insights: InsightSummary,
    pub confidence: f64,
    pub processing_time_ms: u64,
}

impl ProcessingResult {
    /// 从已完成计划的上下文汇总：读取最后一次校验与路由输出
    pub fn compile(
        ctx: &TaskContext,
        plan_id: &str,
        insights: InsightSummary,
        processing_time_ms: u64,
    ) -> Self {
        let extraction = ctx.extraction();
        let validation = ctx.validation();
        let routing = ctx.routing();

        let validation = match validation {
            Some(v) => ValidationSummary {
                is_valid: v.is_valid,
                issues: v.issue_messages(),
                confidence: v.confidence,
                risk: v.risk,
            },
            None => ValidationSummary {
                is_valid: false,
                issues: vec![MANUAL_REVIEW_ISSUE.to_string()],
                confidence: 0.0,
                risk: RiskTier::High,
            },
        };
        let workflow = match routing {
            Some(r) => WorkflowSummary {
                route: r.route,
                actions: r.rule_actions,
                approval_required: r.route.requires_approval(),
                priority: r.priority,
            },
            None => manual_workflow(),
        };

        Self {
            subject_id: ctx.subject_id.clone(),
            plan_id: Some(plan_id.to_string()),
            session_id: ctx.session_id.clone(),
            status: ResultStatus::Completed,
            extracted_data: extraction.map(|e| e.fields),
            validation,
            workflow,
            insights,
            confidence: ctx.mean_confidence().unwrap_or(0.0),
            processing_time_ms,
        }
    }

    /// 降级结果：低置信度、人工复核
    pub fn degraded(
        subject_id: impl Into<String>,
        plan_id: Option<PlanId>,
        session_id: impl Into<String>,
        reason: &str,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            plan_id,
            session_id: session_id.into(),
            status: ResultStatus::Degraded,
            extracted_data: None,
            validation: ValidationSummary {
                is_valid: false,
                issues: vec![MANUAL_REVIEW_ISSUE.to_string()],
                confidence: DEGRADED_CONFIDENCE,
                risk: RiskTier::High,
            },
            workflow: manual_workflow(),
            insights: InsightSummary {
                learnings: vec![format!("processing failed: {reason}")],
                ..Default::default()
            },
            confidence: DEGRADED_CONFIDENCE,
            processing_time_ms,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == ResultStatus::Degraded
    }
}

fn manual_workflow() -> WorkflowSummary {
    WorkflowSummary {
        route: RouteAction::ManualReview,
        actions: vec![RuleAction::ManualReview],
        approval_required: true,
        priority: ApprovalPriority::High,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::StepOutput;
    use crate::invoice::{Invoice, TrustLevel, Vendor};
    use crate::workers::{RoutingDecision, WorkerRole};
    use std::sync::Arc;

    #[test]
    fn test_degraded_result() {
        let result = ProcessingResult::degraded("inv-1", None, "s-1", "cancelled", 12);
        assert!(result.is_degraded());
        assert_eq!(result.validation.issues, vec![MANUAL_REVIEW_ISSUE.to_string()]);
        assert_eq!(result.workflow.route, RouteAction::ManualReview);
        assert!(result.workflow.approval_required);
        assert_eq!(result.insights.learnings, vec!["processing failed: cancelled".to_string()]);
    }

    #[test]
    fn test_compile_reads_routing() {
        let invoice = Invoice::new("inv-1", "N-1", Vendor::new("v", "V", TrustLevel::High), 10.0);
        let mut ctx = TaskContext::new(Arc::new(invoice));
        let decision = RoutingDecision::manual_fallback("placeholder");
        ctx.record(
            WorkerRole::Router,
            StepOutput::from_typed(&decision, decision.confidence).unwrap(),
        );
        let result = ProcessingResult::compile(&ctx, "p-1", InsightSummary::default(), 5);
        assert_eq!(result.status, ResultStatus::Completed);
        assert_eq!(result.plan_id.as_deref(), Some("p-1"));
        assert_eq!(result.workflow.route, RouteAction::ManualReview);
        // 没有校验输出时保守处理
        assert!(!result.validation.is_valid);
        assert!((result.confidence - 0.2).abs() < 1e-9);
    }
}
