//! 学习经验与模式洞察类型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::invoice::{AmountRange, DocumentType};
use crate::workers::router::RouteAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceType {
    ApprovalOutcome,
    ValidationAccuracy,
    ProcessingEfficiency,
    RuleEffectiveness,
    UserFeedback,
}

/// 洞察推荐的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "route")]
pub enum RecommendedAction {
    Maintain,
    OptimizeWorkflow,
    ImproveExtraction,
    ReviseRule,
    Route(RouteAction),
}

impl RecommendedAction {
    /// 生成适配建议时的权重；不产生建议的动作返回 None
    pub fn adaptation_weight(&self) -> Option<f64> {
        match self {
            RecommendedAction::OptimizeWorkflow => Some(0.3),
            RecommendedAction::ImproveExtraction => Some(0.25),
            RecommendedAction::ReviseRule => Some(0.2),
            _ => None,
        }
    }
}

/// 经验发生时的上下文；按经验类型填充不同字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    /// 计划复杂度（simple / complex / exceptional）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteAction>,
}

impl ExperienceContext {
    pub fn amount_range(&self) -> Option<AmountRange> {
        self.amount.map(AmountRange::from_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceOutcome {
    pub success: bool,
    /// 0..1
    pub effectiveness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningExperience {
    pub id: String,
    pub experience_type: ExperienceType,
    pub context: ExperienceContext,
    pub outcome: ExperienceOutcome,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl LearningExperience {
    pub fn new(
        experience_type: ExperienceType,
        context: ExperienceContext,
        outcome: ExperienceOutcome,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            experience_type,
            context,
            outcome,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        }
    }

    /// 该经验应更新的洞察键
    pub fn insight_keys(&self) -> Vec<String> {
        let ctx = &self.context;
        match self.experience_type {
            ExperienceType::ApprovalOutcome => {
                let mut keys = Vec::new();
                if let Some(vendor) = &ctx.vendor_id {
                    keys.push(vendor_key(vendor));
                }
                if let Some(range) = ctx.amount_range() {
                    keys.push(amount_range_key(range));
                    if let Some(vendor) = &ctx.vendor_id {
                        keys.push(format!("{}:{}", vendor_key(vendor), amount_range_key(range)));
                    }
                }
                keys
            }
            ExperienceType::ValidationAccuracy => ctx
                .document_type
                .map(|t| vec![format!("document-type:{}", t.as_str())])
                .unwrap_or_default(),
            ExperienceType::ProcessingEfficiency => ctx
                .workflow
                .as_ref()
                .map(|w| vec![format!("workflow:{w}")])
                .unwrap_or_default(),
            ExperienceType::RuleEffectiveness => ctx
                .rule_id
                .as_ref()
                .map(|r| vec![format!("rule:{r}")])
                .unwrap_or_default(),
            ExperienceType::UserFeedback => ctx
                .category
                .as_ref()
                .map(|c| vec![format!("feedback:{c}")])
                .unwrap_or_default(),
        }
    }

    /// 由本次经验推出的推荐动作
    pub fn recommended_action(&self) -> RecommendedAction {
        let weak = self.outcome.effectiveness < 0.7;
        match self.experience_type {
            ExperienceType::ApprovalOutcome => match (self.outcome.success, self.context.route) {
                (true, Some(route)) => RecommendedAction::Route(route),
                _ => RecommendedAction::Route(RouteAction::ManualReview),
            },
            ExperienceType::ValidationAccuracy if weak => RecommendedAction::ImproveExtraction,
            ExperienceType::ProcessingEfficiency if weak => RecommendedAction::OptimizeWorkflow,
            ExperienceType::RuleEffectiveness if weak => RecommendedAction::ReviseRule,
            ExperienceType::UserFeedback if self.outcome.effectiveness < 0.5 => {
                RecommendedAction::OptimizeWorkflow
            }
            _ => RecommendedAction::Maintain,
        }
    }
}

pub fn vendor_key(vendor_id: &str) -> String {
    format!("vendor:{vendor_id}")
}

pub fn amount_range_key(range: AmountRange) -> String {
    format!("amount-range:{}", range.as_str())
}

/// 派生洞察：按复合键累积的滚动统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInsight {
    pub pattern: String,
    pub confidence: f64,
    pub frequency: u64,
    pub effectiveness: f64,
    pub recommended_action: RecommendedAction,
    pub last_updated: DateTime<Utc>,
}

impl PatternInsight {
    pub(crate) fn first(pattern: String, exp: &LearningExperience) -> Self {
        Self {
            pattern,
            confidence: exp.confidence,
            frequency: 1,
            effectiveness: exp.outcome.effectiveness.clamp(0.0, 1.0),
            recommended_action: exp.recommended_action(),
            last_updated: exp.timestamp,
        }
    }

    /// 按已有频次加权的滑动平均；频次只增不减
    pub(crate) fn absorb(&mut self, exp: &LearningExperience) {
        let n = self.frequency as f64;
        self.confidence = (self.confidence * n + exp.confidence) / (n + 1.0);
        self.effectiveness =
            (self.effectiveness * n + exp.outcome.effectiveness.clamp(0.0, 1.0)) / (n + 1.0);
        self.frequency += 1;
        self.recommended_action = exp.recommended_action();
        self.last_updated = exp.timestamp;
    }
}

/// 适配建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pattern: String,
    pub action: RecommendedAction,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub frequency: u64,
}

/// 路由预测（仅作参考）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePrediction {
    pub route: Option<RouteAction>,
    pub confidence: f64,
    pub basis: String,
}

impl RoutePrediction {
    pub fn neutral() -> Self {
        Self {
            route: None,
            confidence: 0.5,
            basis: "no learned pattern".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStats {
    pub experiences: usize,
    pub insights: usize,
    pub adaptations: usize,
}
