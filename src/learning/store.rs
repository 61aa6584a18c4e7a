//! 自适应学习存储
//!
//! 追加经验日志（有上限，最旧的先丢弃），并按类型相关的复合键累积 PatternInsight；
//! 洞察只增不减，不随日志淘汰。

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use super::types::{
    amount_range_key, vendor_key, ExperienceContext, ExperienceOutcome, ExperienceType,
    LearningExperience, LearningStats, PatternInsight, RecommendedAction, Recommendation,
    RoutePrediction,
};
use crate::config::LearningSection;
use crate::invoice::{AmountRange, Invoice};
use crate::workers::router::RouteAction;

const VENDOR_PREDICTION_THRESHOLD: f64 = 0.7;
const AMOUNT_RANGE_PREDICTION_THRESHOLD: f64 = 0.6;

pub struct AdaptiveLearningStore {
    experiences: RwLock<VecDeque<LearningExperience>>,
    insights: RwLock<HashMap<String, PatternInsight>>,
    settings: LearningSection,
}

impl Default for AdaptiveLearningStore {
    fn default() -> Self {
        Self::new(LearningSection::default())
    }
}

impl AdaptiveLearningStore {
    pub fn new(settings: LearningSection) -> Self {
        Self {
            experiences: RwLock::new(VecDeque::new()),
            insights: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// 记录一条经验并更新对应洞察
    pub async fn record_experience(&self, exp: LearningExperience) {
        let keys = exp.insight_keys();
        {
            let mut insights = self.insights.write().await;
            for key in &keys {
                match insights.get_mut(key) {
                    Some(insight) => insight.absorb(&exp),
                    None => {
                        insights.insert(key.clone(), PatternInsight::first(key.clone(), &exp));
                    }
                }
            }
        }
        tracing::debug!(
            experience_type = ?exp.experience_type,
            keys = ?keys,
            "Learning experience recorded"
        );

        let mut log = self.experiences.write().await;
        log.push_back(exp);
        while log.len() > self.settings.max_experiences.max(1) {
            log.pop_front();
        }
    }

    /// 审批结果：更新供应商、金额区间及二者组合的洞察
    pub async fn record_approval_outcome(&self, invoice: &Invoice, route: RouteAction, approved: bool) {
        let exp = LearningExperience::new(
            ExperienceType::ApprovalOutcome,
            ExperienceContext {
                vendor_id: Some(invoice.vendor.id.clone()),
                amount: Some(invoice.amount),
                route: Some(route),
                ..Default::default()
            },
            ExperienceOutcome {
                success: approved,
                effectiveness: if approved { 1.0 } else { 0.0 },
                processing_time_ms: None,
                note: None,
            },
            if approved { 0.9 } else { 0.3 },
        );
        self.record_experience(exp).await;
    }

    pub async fn record_rule_effectiveness(&self, rule_id: &str, effective: bool) {
        let exp = LearningExperience::new(
            ExperienceType::RuleEffectiveness,
            ExperienceContext {
                rule_id: Some(rule_id.to_string()),
                ..Default::default()
            },
            ExperienceOutcome {
                success: effective,
                effectiveness: if effective { 1.0 } else { 0.0 },
                processing_time_ms: None,
                note: None,
            },
            0.8,
        );
        self.record_experience(exp).await;
    }

    /// 用户反馈：评分 1..=5，映射到 0..1 的有效度
    pub async fn record_user_feedback(&self, category: &str, rating: u8, comment: Option<String>) {
        let rating = rating.clamp(1, 5);
        let effectiveness = f64::from(rating - 1) / 4.0;
        let exp = LearningExperience::new(
            ExperienceType::UserFeedback,
            ExperienceContext {
                category: Some(category.to_string()),
                ..Default::default()
            },
            ExperienceOutcome {
                success: rating >= 3,
                effectiveness,
                processing_time_ms: None,
                note: comment,
            },
            0.85,
        );
        self.record_experience(exp).await;
    }

    /// 扫描高频且高置信的洞察，生成改进建议（按预期收益降序）
    pub async fn generate_adaptations(&self) -> Vec<Recommendation> {
        let insights = self.insights.read().await;
        let mut out: Vec<Recommendation> = insights
            .values()
            .filter(|i| {
                i.frequency >= self.settings.min_frequency
                    && i.confidence > self.settings.min_confidence
            })
            .filter_map(|i| {
                let weight = i.recommended_action.adaptation_weight()?;
                Some(Recommendation {
                    pattern: i.pattern.clone(),
                    action: i.recommended_action,
                    expected_improvement: (1.0 - i.effectiveness) * weight,
                    confidence: i.confidence,
                    frequency: i.frequency,
                })
            })
            .collect();
        out.sort_by(|a, b| {
            b.expected_improvement
                .total_cmp(&a.expected_improvement)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });
        out
    }

    /// 路由预测：先看供应商洞察，再看金额区间洞察，否则中性
    pub async fn predict_route(&self, vendor_id: &str, amount: f64) -> RoutePrediction {
        let insights = self.insights.read().await;
        let candidates = [
            (vendor_key(vendor_id), VENDOR_PREDICTION_THRESHOLD),
            (
                amount_range_key(AmountRange::from_amount(amount)),
                AMOUNT_RANGE_PREDICTION_THRESHOLD,
            ),
        ];
        for (key, threshold) in candidates {
            if let Some(insight) = insights.get(&key) {
                if insight.confidence > threshold {
                    if let RecommendedAction::Route(route) = insight.recommended_action {
                        return RoutePrediction {
                            route: Some(route),
                            confidence: insight.confidence,
                            basis: format!("{key} (n={})", insight.frequency),
                        };
                    }
                }
            }
        }
        RoutePrediction::neutral()
    }

    pub async fn insight(&self, key: &str) -> Option<PatternInsight> {
        self.insights.read().await.get(key).cloned()
    }

    /// 全部洞察快照，按键排序
    pub async fn insights(&self) -> Vec<PatternInsight> {
        let mut all: Vec<PatternInsight> = self.insights.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.pattern.cmp(&b.pattern));
        all
    }

    /// 最近 n 条经验（新的在后）
    pub async fn recent_experiences(&self, n: usize) -> Vec<LearningExperience> {
        let log = self.experiences.read().await;
        log.iter().skip(log.len().saturating_sub(n)).cloned().collect()
    }

    pub async fn stats(&self) -> LearningStats {
        LearningStats {
            experiences: self.experiences.read().await.len(),
            insights: self.insights.read().await.len(),
            adaptations: self.generate_adaptations().await.len(),
        }
    }
}
