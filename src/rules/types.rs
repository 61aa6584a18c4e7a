//! 业务规则类型定义
//!
//! 规则 = 条件（金额上下界、最低信任度、供应商状态）+ 动作（封闭词表）+ 优先级。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invoice::{TrustLevel, VendorStatus};

pub type RuleId = String;

/// 规则动作（封闭词表）
///
/// 声明顺序即严格程度：越靠前越严格，`Ord` 直接用于合并动作排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Reject,
    ExecutiveApproval,
    ManagerApproval,
    ManualReview,
    VendorVerification,
    FlagForReview,
    AutoApprove,
}

impl RuleAction {
    pub const ALL: [RuleAction; 7] = [
        RuleAction::Reject,
        RuleAction::ExecutiveApproval,
        RuleAction::ManagerApproval,
        RuleAction::ManualReview,
        RuleAction::VendorVerification,
        RuleAction::FlagForReview,
        RuleAction::AutoApprove,
    ];

    /// 严格程度排名：1 最严格
    pub fn severity_rank(&self) -> u8 {
        match self {
            RuleAction::Reject => 1,
            RuleAction::ExecutiveApproval => 2,
            RuleAction::ManagerApproval => 3,
            RuleAction::ManualReview => 4,
            RuleAction::VendorVerification => 5,
            RuleAction::FlagForReview => 6,
            RuleAction::AutoApprove => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Reject => "reject",
            RuleAction::ExecutiveApproval => "executive_approval",
            RuleAction::ManagerApproval => "manager_approval",
            RuleAction::ManualReview => "manual_review",
            RuleAction::VendorVerification => "vendor_verification",
            RuleAction::FlagForReview => "flag_for_review",
            RuleAction::AutoApprove => "auto_approve",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| RuleError::InvalidAction(s.to_string()))
    }
}

/// 由动作推导优先级：取最严格动作的排名；无动作时为最宽松
pub fn derive_priority(actions: &[RuleAction]) -> u8 {
    actions
        .iter()
        .map(RuleAction::severity_rank)
        .min()
        .unwrap_or(RuleAction::AutoApprove.severity_rank())
}

/// 规则条件：未设置的条件视为恒真
///
/// 金额区间默认为半开区间 `[min_amount, max_amount)`；`min_exclusive` 时下界也不含。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<f64>,
    /// 下界是否严格（"exceeds $X" 一类短语）
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub min_exclusive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trust_level: Option<TrustLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_status: Option<VendorStatus>,
    /// 重复检查窗口（天）；仅作为元数据，不参与适用性判断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_window_days: Option<u32>,
}

impl RuleConditions {
    pub fn is_empty(&self) -> bool {
        self.min_amount.is_none()
            && self.max_amount.is_none()
            && self.min_trust_level.is_none()
            && self.vendor_status.is_none()
            && self.duplicate_window_days.is_none()
    }

    /// 逐项检查已设置的条件
    pub fn checks(&self, ctx: &RuleContext) -> Vec<ConditionCheck> {
        let mut checks = Vec::new();
        if let Some(min) = self.min_amount {
            checks.push(ConditionCheck {
                condition: "min_amount".to_string(),
                expected: format!("{} {min}", self.min_operator()),
                actual: format!("{:.2}", ctx.amount),
                passed: if self.min_exclusive { ctx.amount > min } else { ctx.amount >= min },
            });
        }
        if let Some(max) = self.max_amount {
            checks.push(ConditionCheck {
                condition: "max_amount".to_string(),
                expected: format!("< {max}"),
                actual: format!("{:.2}", ctx.amount),
                passed: ctx.amount < max,
            });
        }
        if let Some(trust) = self.min_trust_level {
            checks.push(ConditionCheck {
                condition: "min_trust_level".to_string(),
                expected: format!(">= {}", trust.as_str()),
                actual: ctx.trust_level.as_str().to_string(),
                passed: ctx.trust_level >= trust,
            });
        }
        if let Some(status) = self.vendor_status {
            checks.push(ConditionCheck {
                condition: "vendor_status".to_string(),
                expected: status.as_str().to_string(),
                actual: ctx.vendor_status.as_str().to_string(),
                passed: ctx.vendor_status == status,
            });
        }
        checks
    }

    fn min_operator(&self) -> &'static str {
        if self.min_exclusive {
            ">"
        } else {
            ">="
        }
    }

    pub fn holds(&self, ctx: &RuleContext) -> bool {
        self.checks(ctx).iter().all(|c| c.passed)
    }

    /// 人类可读的条件摘要，如 `amount < 1000 and trust >= high`
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(min) = self.min_amount {
            parts.push(format!("amount {} {min}", self.min_operator()));
        }
        if let Some(max) = self.max_amount {
            parts.push(format!("amount < {max}"));
        }
        if let Some(trust) = self.min_trust_level {
            parts.push(format!("trust >= {}", trust.as_str()));
        }
        if let Some(status) = self.vendor_status {
            parts.push(format!("vendor is {}", status.as_str()));
        }
        if let Some(days) = self.duplicate_window_days {
            parts.push(format!("duplicates within {days} days"));
        }
        if parts.is_empty() {
            "always".to_string()
        } else {
            parts.join(" and ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionCheck {
    pub condition: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub natural_language_source: Option<String>,
    #[serde(default)]
    pub conditions: RuleConditions,
    pub actions: Vec<RuleAction>,
    pub priority: u8,
    #[serde(default = "default_active")]
    pub active: bool,
    /// 解析置信度；手工定义的规则为 1.0
    #[serde(default = "default_rule_confidence")]
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

fn default_rule_confidence() -> f64 {
    1.0
}

impl BusinessRule {
    /// 手工定义规则：优先级由动作推导
    pub fn new(name: impl Into<String>, conditions: RuleConditions, actions: Vec<RuleAction>) -> Self {
        let priority = derive_priority(&actions);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            natural_language_source: None,
            conditions,
            actions,
            priority,
            active: true,
            confidence: 1.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn applies_to(&self, ctx: &RuleContext) -> bool {
        self.active && self.conditions.holds(ctx)
    }
}

/// 规则评估上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleContext {
    pub amount: f64,
    pub vendor_id: String,
    pub trust_level: TrustLevel,
    pub vendor_status: VendorStatus,
    #[serde(default)]
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub id: RuleId,
    pub name: String,
    pub priority: u8,
    pub actions: Vec<RuleAction>,
}

/// 评估结果：适用规则（按优先级升序）+ 合并动作（最严格在前）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub applicable_rules: Vec<RuleMatch>,
    pub consolidated_actions: Vec<RuleAction>,
    pub reasoning: String,
}

impl RuleEvaluation {
    pub fn top_action(&self) -> Option<RuleAction> {
        self.consolidated_actions.first().copied()
    }
}

/// 单条规则针对某上下文的解释
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExplanation {
    pub rule_id: RuleId,
    pub name: String,
    pub active: bool,
    pub applies: bool,
    pub checks: Vec<ConditionCheck>,
    pub summary: String,
}

/// 规则部分更新
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    pub conditions: Option<RuleConditions>,
    pub actions: Option<Vec<RuleAction>>,
    pub priority: Option<u8>,
    pub active: Option<bool>,
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule not found: {0}")]
    NotFound(RuleId),

    #[error("Rule must have at least one action")]
    EmptyActions,

    #[error("Invalid rule action: {0}")]
    InvalidAction(String),

    #[error("Invalid amount bounds: min {min} >= max {max}")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Seed rules error: {0}")]
    Seed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(amount: f64, trust: TrustLevel, status: VendorStatus) -> RuleContext {
        RuleContext {
            amount,
            vendor_id: "v1".to_string(),
            trust_level: trust,
            vendor_status: status,
            flagged: false,
        }
    }

    #[test]
    fn test_action_order_matches_severity() {
        let mut sorted = RuleAction::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, RuleAction::ALL.to_vec());
        for pair in RuleAction::ALL.windows(2) {
            assert!(pair[0].severity_rank() < pair[1].severity_rank());
        }
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("auto_approve".parse::<RuleAction>().unwrap(), RuleAction::AutoApprove);
        assert!("approve_everything".parse::<RuleAction>().is_err());
    }

    #[test]
    fn test_derive_priority_uses_most_severe() {
        assert_eq!(
            derive_priority(&[RuleAction::FlagForReview, RuleAction::ManagerApproval]),
            3
        );
        assert_eq!(derive_priority(&[]), 7);
    }

    #[test]
    fn test_unset_conditions_are_vacuous() {
        let conditions = RuleConditions::default();
        assert!(conditions.holds(&ctx(1.0, TrustLevel::Low, VendorStatus::New)));
        assert_eq!(conditions.describe(), "always");
    }

    #[test]
    fn test_amount_bounds_half_open() {
        let conditions = RuleConditions {
            min_amount: Some(1_000.0),
            max_amount: Some(5_000.0),
            ..Default::default()
        };
        assert!(conditions.holds(&ctx(1_000.0, TrustLevel::Low, VendorStatus::Established)));
        assert!(!conditions.holds(&ctx(5_000.0, TrustLevel::Low, VendorStatus::Established)));
    }

    #[test]
    fn test_exclusive_lower_bound() {
        let conditions = RuleConditions {
            min_amount: Some(10_000.0),
            min_exclusive: true,
            ..Default::default()
        };
        assert!(!conditions.holds(&ctx(10_000.0, TrustLevel::Low, VendorStatus::Established)));
        assert!(conditions.holds(&ctx(10_000.01, TrustLevel::Low, VendorStatus::Established)));
        assert_eq!(conditions.describe(), "amount > 10000");
    }

    #[test]
    fn test_trust_and_status_conditions() {
        let conditions = RuleConditions {
            min_trust_level: Some(TrustLevel::Medium),
            vendor_status: Some(VendorStatus::Established),
            ..Default::default()
        };
        assert!(conditions.holds(&ctx(10.0, TrustLevel::High, VendorStatus::Established)));
        assert!(!conditions.holds(&ctx(10.0, TrustLevel::Low, VendorStatus::Established)));
        assert!(!conditions.holds(&ctx(10.0, TrustLevel::High, VendorStatus::New)));
    }

    #[test]
    fn test_inactive_rule_never_applies() {
        let mut rule = BusinessRule::new("any", RuleConditions::default(), vec![RuleAction::Reject]);
        assert!(rule.applies_to(&ctx(1.0, TrustLevel::High, VendorStatus::New)));
        rule.active = false;
        assert!(!rule.applies_to(&ctx(1.0, TrustLevel::High, VendorStatus::New)));
    }
}
