//! 工作流路由 Worker
//!
//! 先评估业务规则，再按固定优先级叠加覆盖：
//! 高风险强制人工或高管审批，快速通道自动通过，校验问题强制人工复核，
//! 否则采用规则最严格动作；无规则时参考学习预测，最后默认经理审批。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::flavor::ReasoningFlavor;
use super::validator::{RiskTier, ValidationResult};
use super::{Worker, WorkerError, WorkerRole};
use crate::core::context::TaskContext;
use crate::core::plan::{StepAction, StepOutput};
use crate::invoice::{Invoice, Scenario, TrustLevel, VendorStatus};
use crate::learning::{AdaptiveLearningStore, RoutePrediction};
use crate::rules::{BusinessRuleEngine, RuleAction, RuleContext, RuleEvaluation};

const EXECUTIVE_THRESHOLD: f64 = 10_000.0;
const FAST_PATH_LIMIT: f64 = 1_000.0;
/// 学习预测被采纳所需的最低置信度
const PREDICTION_THRESHOLD: f64 = 0.7;

/// 路由结果（审批动作）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    AutoApprove,
    ManagerApproval,
    ExecutiveApproval,
    ManualReview,
    Reject,
}

impl RouteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteAction::AutoApprove => "auto_approve",
            RouteAction::ManagerApproval => "manager_approval",
            RouteAction::ExecutiveApproval => "executive_approval",
            RouteAction::ManualReview => "manual_review",
            RouteAction::Reject => "reject",
        }
    }

    /// 除自动通过外都需要人工审批
    pub fn requires_approval(&self) -> bool {
        *self != RouteAction::AutoApprove
    }

    /// 规则动作到路由的映射
    pub fn from_rule_action(action: RuleAction) -> Self {
        match action {
            RuleAction::Reject => RouteAction::Reject,
            RuleAction::ExecutiveApproval => RouteAction::ExecutiveApproval,
            RuleAction::ManagerApproval => RouteAction::ManagerApproval,
            RuleAction::ManualReview
            | RuleAction::VendorVerification
            | RuleAction::FlagForReview => RouteAction::ManualReview,
            RuleAction::AutoApprove => RouteAction::AutoApprove,
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// 路由依据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingBasis {
    HighRiskOverride,
    FastPath,
    ValidationIssues,
    Rules,
    Learned,
    Default,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: RouteAction,
    pub approval_required: bool,
    pub priority: ApprovalPriority,
    pub confidence: f64,
    pub basis: RoutingBasis,
    pub rule_actions: Vec<RuleAction>,
    pub applied_rules: Vec<String>,
    pub reasoning: String,
}

impl RoutingDecision {
    /// 路由失败时的占位结果：人工复核，低置信度
    pub fn manual_fallback(reason: impl Into<String>) -> Self {
        Self {
            route: RouteAction::ManualReview,
            approval_required: true,
            priority: ApprovalPriority::High,
            confidence: 0.2,
            basis: RoutingBasis::Fallback,
            rule_actions: Vec::new(),
            applied_rules: Vec::new(),
            reasoning: reason.into(),
        }
    }
}

/// 路由所需的事实
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingFacts {
    pub amount: f64,
    pub trust_level: TrustLevel,
    pub vendor_status: VendorStatus,
    pub flagged: bool,
    pub scenario: Option<Scenario>,
    pub risk: RiskTier,
    pub issue_count: usize,
}

impl RoutingFacts {
    pub fn new(invoice: &Invoice, validation: &ValidationResult) -> Self {
        Self {
            amount: invoice.amount,
            trust_level: invoice.vendor.trust_level,
            vendor_status: invoice.vendor.status,
            flagged: invoice.flagged,
            scenario: invoice.scenario,
            risk: validation.risk,
            issue_count: validation.issues.len(),
        }
    }

    pub fn is_high_risk(&self) -> bool {
        self.flagged
            || self.risk == RiskTier::High
            || self.vendor_status == VendorStatus::Suspended
            || matches!(
                self.scenario,
                Some(Scenario::DuplicateSubmission) | Some(Scenario::PriceSpike)
            )
    }

    /// 快速通道：高信任供应商、小额、无问题、未标记
    pub fn fast_path_eligible(&self) -> bool {
        self.trust_level == TrustLevel::High
            && self.amount < FAST_PATH_LIMIT
            && self.issue_count == 0
            && !self.flagged
    }
}

fn priority_for(route: RouteAction, facts: &RoutingFacts) -> ApprovalPriority {
    let base = match route {
        RouteAction::AutoApprove => ApprovalPriority::Low,
        RouteAction::ManagerApproval => ApprovalPriority::Normal,
        RouteAction::ManualReview | RouteAction::ExecutiveApproval => ApprovalPriority::High,
        RouteAction::Reject => ApprovalPriority::Urgent,
    };
    if facts.flagged && route.requires_approval() {
        ApprovalPriority::Urgent
    } else {
        base
    }
}

/// 纯决策函数
pub fn decide(
    facts: &RoutingFacts,
    evaluation: &RuleEvaluation,
    prediction: Option<&RoutePrediction>,
) -> (RouteAction, RoutingBasis, f64) {
    if facts.is_high_risk() {
        let route = if facts.amount > EXECUTIVE_THRESHOLD {
            RouteAction::ExecutiveApproval
        } else {
            RouteAction::ManualReview
        };
        return (route, RoutingBasis::HighRiskOverride, 0.9);
    }
    if facts.fast_path_eligible() {
        return (RouteAction::AutoApprove, RoutingBasis::FastPath, 0.95);
    }
    if facts.issue_count > 0 {
        return (RouteAction::ManualReview, RoutingBasis::ValidationIssues, 0.8);
    }
    if let Some(top) = evaluation.top_action() {
        let n = evaluation.applicable_rules.len() as f64;
        let confidence = (0.6 + 0.1 * n).min(0.9);
        return (RouteAction::from_rule_action(top), RoutingBasis::Rules, confidence);
    }
    if let Some(p) = prediction {
        if let Some(route) = p.route {
            // 预测不能绕过快速通道的条件
            if p.confidence > PREDICTION_THRESHOLD && route != RouteAction::AutoApprove {
                return (route, RoutingBasis::Learned, p.confidence);
            }
        }
    }
    (RouteAction::ManagerApproval, RoutingBasis::Default, 0.5)
}

pub struct RouterWorker {
    rules: Arc<BusinessRuleEngine>,
    learning: Option<Arc<AdaptiveLearningStore>>,
    flavor: Arc<dyn ReasoningFlavor>,
}

impl RouterWorker {
    pub fn new(
        rules: Arc<BusinessRuleEngine>,
        learning: Option<Arc<AdaptiveLearningStore>>,
        flavor: Arc<dyn ReasoningFlavor>,
    ) -> Self {
        Self {
            rules,
            learning,
            flavor,
        }
    }

    pub async fn route(&self, invoice: &Invoice, validation: &ValidationResult) -> RoutingDecision {
        let facts = RoutingFacts::new(invoice, validation);
        let rule_ctx = RuleContext {
            amount: invoice.amount,
            vendor_id: invoice.vendor.id.clone(),
            trust_level: invoice.vendor.trust_level,
            vendor_status: invoice.vendor.status,
            flagged: invoice.flagged,
        };
        let evaluation = self.rules.evaluate(&rule_ctx).await;
        let prediction = match &self.learning {
            Some(store) => Some(store.predict_route(&invoice.vendor.id, invoice.amount).await),
            None => None,
        };

        let (route, basis, confidence) = decide(&facts, &evaluation, prediction.as_ref());
        let reasoning = self.flavor.phrase(
            WorkerRole::Router,
            &format!("{route} ({basis:?}); {}", evaluation.reasoning),
        );
        RoutingDecision {
            route,
            approval_required: route.requires_approval(),
            priority: priority_for(route, &facts),
            confidence,
            basis,
            rule_actions: evaluation.consolidated_actions,
            applied_rules: evaluation.applicable_rules.into_iter().map(|r| r.id).collect(),
            reasoning,
        }
    }
}

#[async_trait]
impl Worker for RouterWorker {
    fn role(&self) -> WorkerRole {
        WorkerRole::Router
    }

    async fn run(
        &self,
        action: StepAction,
        _input: &Value,
        ctx: &TaskContext,
    ) -> Result<StepOutput, WorkerError> {
        if action != StepAction::Route {
            return Err(WorkerError::UnsupportedAction {
                role: self.role(),
                action,
            });
        }
        let validation = ctx
            .validation()
            .ok_or(WorkerError::MissingUpstream(WorkerRole::Validator))?;
        let delay = self.flavor.thinking_delay(self.role());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let decision = self.route(&ctx.invoice, &validation).await;
        tracing::debug!(
            subject_id = %ctx.subject_id,
            route = %decision.route,
            basis = ?decision.basis,
            "Routing decided"
        );
        StepOutput::from_typed(&decision, decision.confidence)
            .map_err(|e| WorkerError::Failed(format!("serialize routing: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::Vendor;
    use crate::workers::flavor::NoFlavor;
    use crate::workers::validator::{ValidationLevel, ValidatorWorker};

    fn facts(amount: f64, trust: TrustLevel) -> RoutingFacts {
        RoutingFacts {
            amount,
            trust_level: trust,
            vendor_status: VendorStatus::Established,
            flagged: false,
            scenario: None,
            risk: RiskTier::Low,
            issue_count: 0,
        }
    }

    fn empty_eval() -> RuleEvaluation {
        RuleEvaluation {
            applicable_rules: vec![],
            consolidated_actions: vec![],
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_fast_path() {
        let (route, basis, confidence) = decide(&facts(300.0, TrustLevel::High), &empty_eval(), None);
        assert_eq!(route, RouteAction::AutoApprove);
        assert_eq!(basis, RoutingBasis::FastPath);
        assert_eq!(confidence, 0.95);
    }

    #[test]
    fn test_high_risk_override() {
        let mut f = facts(25_000.0, TrustLevel::Medium);
        f.flagged = true;
        assert_eq!(decide(&f, &empty_eval(), None).0, RouteAction::ExecutiveApproval);
        f.amount = 2_000.0;
        assert_eq!(decide(&f, &empty_eval(), None).0, RouteAction::ManualReview);

        let mut suspended = facts(300.0, TrustLevel::High);
        suspended.vendor_status = VendorStatus::Suspended;
        assert_eq!(decide(&suspended, &empty_eval(), None).1, RoutingBasis::HighRiskOverride);
    }

    #[test]
    fn test_issues_never_auto_approve() {
        let mut f = facts(300.0, TrustLevel::High);
        f.issue_count = 1;
        f.risk = RiskTier::Medium;
        let eval = RuleEvaluation {
            applicable_rules: vec![],
            consolidated_actions: vec![RuleAction::AutoApprove],
            reasoning: String::new(),
        };
        let confident = RoutePrediction {
            route: Some(RouteAction::AutoApprove),
            confidence: 0.99,
            basis: "vendor:v1".into(),
        };
        let (route, basis, _) = decide(&f, &eval, Some(&confident));
        assert_eq!(route, RouteAction::ManualReview);
        assert_eq!(basis, RoutingBasis::ValidationIssues);
    }

    #[test]
    fn test_rules_then_learned_then_default() {
        let f = facts(3_000.0, TrustLevel::Medium);
        let eval = RuleEvaluation {
            applicable_rules: vec![],
            consolidated_actions: vec![RuleAction::ManagerApproval, RuleAction::FlagForReview],
            reasoning: String::new(),
        };
        assert_eq!(decide(&f, &eval, None).0, RouteAction::ManagerApproval);

        let prediction = RoutePrediction {
            route: Some(RouteAction::ExecutiveApproval),
            confidence: 0.8,
            basis: "vendor:v1".into(),
        };
        let (route, basis, confidence) = decide(&f, &empty_eval(), Some(&prediction));
        assert_eq!(route, RouteAction::ExecutiveApproval);
        assert_eq!(basis, RoutingBasis::Learned);
        assert_eq!(confidence, 0.8);

        let weak = RoutePrediction {
            confidence: 0.6,
            ..prediction
        };
        assert_eq!(
            decide(&f, &empty_eval(), Some(&weak)),
            (RouteAction::ManagerApproval, RoutingBasis::Default, 0.5)
        );
    }

    #[test]
    fn test_rule_action_mapping() {
        assert_eq!(
            RouteAction::from_rule_action(RuleAction::VendorVerification),
            RouteAction::ManualReview
        );
        assert!(!RouteAction::AutoApprove.requires_approval());
        assert!(RouteAction::Reject.requires_approval());
    }

    #[tokio::test]
    async fn test_route_with_default_rules() {
        let router = RouterWorker::new(
            Arc::new(BusinessRuleEngine::with_defaults()),
            None,
            Arc::new(NoFlavor),
        );
        let invoice = Invoice::new("a", "N-1", Vendor::new("v1", "Acme", TrustLevel::Medium), 7_000.0)
            .with_po("PO-1");
        let validation = ValidatorWorker::new(Arc::new(NoFlavor))
            .validate(&invoice, ValidationLevel::Basic);
        let decision = router.route(&invoice, &validation).await;
        assert_eq!(decision.route, RouteAction::ManagerApproval);
        assert_eq!(decision.basis, RoutingBasis::Rules);
        assert!(decision.approval_required);
        assert_eq!(decision.priority, ApprovalPriority::Normal);
        assert_eq!(decision.applied_rules, vec!["default-medium-high-value".to_string()]);
        assert!((decision.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_manual_fallback() {
        let fallback = RoutingDecision::manual_fallback("router unavailable");
        assert_eq!(fallback.route, RouteAction::ManualReview);
        assert!(fallback.approval_required);
        assert!(fallback.confidence < 0.5);
    }
}
