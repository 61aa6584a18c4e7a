//! 业务规则引擎
//!
//! 持有一组声明式规则（RwLock 保护，可并发评估），提供评估、解释与管理接口；
//! 规则可来自内置默认值、TOML 种子文件或自然语言解析。

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use tokio::sync::RwLock;

use super::parser::parse_rule_text;
use super::types::{
    derive_priority, BusinessRule, RuleAction, RuleConditions, RuleContext, RuleError,
    RuleEvaluation, RuleExplanation, RuleId, RuleMatch, RulePatch,
};
use crate::invoice::{TrustLevel, VendorStatus};

/// 合并动作：去重并按严格程度排序（最严格在前）；对结果再次合并不变
pub fn consolidate<I>(actions: I) -> Vec<RuleAction>
where
    I: IntoIterator<Item = RuleAction>,
{
    actions.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

#[derive(Default)]
pub struct BusinessRuleEngine {
    rules: RwLock<Vec<BusinessRule>>,
}

impl BusinessRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带内置默认规则的引擎
    pub fn with_defaults() -> Self {
        Self {
            rules: RwLock::new(default_rules()),
        }
    }

    /// 评估上下文：收集全部适用规则（按优先级升序）并合并动作
    pub async fn evaluate(&self, ctx: &RuleContext) -> RuleEvaluation {
        let rules = self.rules.read().await;
        let mut applicable: Vec<&BusinessRule> =
            rules.iter().filter(|r| r.applies_to(ctx)).collect();
        applicable.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let consolidated_actions =
            consolidate(applicable.iter().flat_map(|r| r.actions.iter().copied()));

        let reasoning = if applicable.is_empty() {
            format!(
                "No rule applies to amount {:.2} (trust {}, vendor {})",
                ctx.amount,
                ctx.trust_level.as_str(),
                ctx.vendor_status.as_str()
            )
        } else {
            let names: Vec<String> = applicable
                .iter()
                .map(|r| format!("{} (p{})", r.name, r.priority))
                .collect();
            let actions: Vec<&str> = consolidated_actions.iter().map(|a| a.as_str()).collect();
            format!(
                "{} rule(s) apply: {}; actions: {}",
                applicable.len(),
                names.join(", "),
                actions.join(" > ")
            )
        };

        RuleEvaluation {
            applicable_rules: applicable
                .into_iter()
                .map(|r| RuleMatch {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    priority: r.priority,
                    actions: r.actions.clone(),
                })
                .collect(),
            consolidated_actions,
            reasoning,
        }
    }

    /// 从自然语言创建规则并加入引擎
    ///
    /// 金额子句无法解析或区间矛盾时，规则以停用状态加入，等待人工修正。
    pub async fn create_from_text(&self, sentence: &str) -> Result<BusinessRule, RuleError> {
        let parsed = parse_rule_text(sentence);
        if !parsed.unresolved.is_empty() {
            tracing::warn!(
                rule_id = %parsed.rule.id,
                unresolved = ?parsed.unresolved,
                "Rule parsed from text is inactive until reviewed"
            );
        }
        tracing::info!(
            rule_id = %parsed.rule.id,
            confidence = parsed.rule.confidence,
            clauses = ?parsed.matched_clauses,
            "Rule parsed from text"
        );
        self.add(parsed.rule.clone()).await?;
        Ok(parsed.rule)
    }

    /// 加入规则；同 id 已存在时覆盖
    pub async fn add(&self, rule: BusinessRule) -> Result<RuleId, RuleError> {
        validate(&rule.conditions, &rule.actions, rule.active)?;
        let id = rule.id.clone();
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(id)
    }

    /// 部分更新；仅改动作而未显式给优先级时，优先级随动作重新推导
    pub async fn update(&self, id: &str, patch: RulePatch) -> Result<BusinessRule, RuleError> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;

        let conditions = patch.conditions.unwrap_or_else(|| rule.conditions.clone());
        let actions = patch.actions.unwrap_or_else(|| rule.actions.clone());
        validate(&conditions, &actions, patch.active.unwrap_or(rule.active))?;

        let actions_changed = actions != rule.actions;
        rule.conditions = conditions;
        rule.actions = actions;
        if let Some(name) = patch.name {
            rule.name = name;
        }
        if let Some(active) = patch.active {
            rule.active = active;
        }
        match patch.priority {
            Some(p) => rule.priority = p,
            None if actions_changed => rule.priority = derive_priority(&rule.actions),
            None => {}
        }
        Ok(rule.clone())
    }

    pub async fn delete(&self, id: &str) -> Result<BusinessRule, RuleError> {
        let mut rules = self.rules.write().await;
        let pos = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        Ok(rules.remove(pos))
    }

    pub async fn get(&self, id: &str) -> Option<BusinessRule> {
        self.rules.read().await.iter().find(|r| r.id == id).cloned()
    }

    /// 启用中的规则，按优先级升序
    pub async fn list_active(&self) -> Vec<BusinessRule> {
        let mut active: Vec<BusinessRule> = self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        active
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rules.read().await.is_empty()
    }

    /// 解释单条规则对给定上下文的逐项判定
    pub async fn explain(&self, id: &str, ctx: &RuleContext) -> Result<RuleExplanation, RuleError> {
        let rules = self.rules.read().await;
        let rule = rules
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RuleError::NotFound(id.to_string()))?;
        let checks = rule.conditions.checks(ctx);
        let applies = rule.active && checks.iter().all(|c| c.passed);
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.condition.as_str())
            .collect();
        let summary = if !rule.active {
            format!("'{}' is inactive", rule.name)
        } else if applies {
            format!("'{}' applies: {}", rule.name, rule.conditions.describe())
        } else {
            format!("'{}' does not apply; failed: {}", rule.name, failed.join(", "))
        };
        Ok(RuleExplanation {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            active: rule.active,
            applies,
            checks,
            summary,
        })
    }

    /// 从 TOML 种子文件加载规则，返回加载条数
    pub async fn load_toml(&self, path: &Path) -> Result<usize, RuleError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RuleError::Seed(format!("{}: {e}", path.display())))?;
        self.load_toml_str(&raw).await
    }

    pub async fn load_toml_str(&self, raw: &str) -> Result<usize, RuleError> {
        let file: SeedFile = toml::from_str(raw).map_err(|e| RuleError::Seed(e.to_string()))?;
        let count = file.rules.len();
        for seed in file.rules {
            self.add(seed.into_rule()).await?;
        }
        Ok(count)
    }
}

/// 停用的规则允许保留矛盾的金额区间，启用时再校验
fn validate(conditions: &RuleConditions, actions: &[RuleAction], active: bool) -> Result<(), RuleError> {
    if actions.is_empty() {
        return Err(RuleError::EmptyActions);
    }
    if !active {
        return Ok(());
    }
    if let (Some(min), Some(max)) = (conditions.min_amount, conditions.max_amount) {
        if min >= max {
            return Err(RuleError::InvalidBounds { min, max });
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    rules: Vec<SeedRule>,
}

#[derive(Debug, Deserialize)]
struct SeedRule {
    id: Option<String>,
    name: String,
    #[serde(default)]
    conditions: RuleConditions,
    actions: Vec<RuleAction>,
    priority: Option<u8>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

impl SeedRule {
    fn into_rule(self) -> BusinessRule {
        let mut rule = BusinessRule::new(self.name, self.conditions, self.actions);
        if let Some(id) = self.id {
            rule.id = id;
        }
        if let Some(p) = self.priority {
            rule.priority = p;
        }
        rule.active = self.active;
        rule
    }
}

/// 内置默认规则
pub fn default_rules() -> Vec<BusinessRule> {
    vec![
        BusinessRule::new(
            "Suspended vendor",
            RuleConditions {
                vendor_status: Some(VendorStatus::Suspended),
                ..Default::default()
            },
            vec![RuleAction::Reject],
        )
        .with_id("default-suspended-vendor"),
        BusinessRule::new(
            "High value",
            RuleConditions {
                min_amount: Some(10_000.0),
                ..Default::default()
            },
            vec![RuleAction::ExecutiveApproval],
        )
        .with_id("default-high-value"),
        BusinessRule::new(
            "Medium-high value",
            RuleConditions {
                min_amount: Some(5_000.0),
                max_amount: Some(10_000.0),
                ..Default::default()
            },
            vec![RuleAction::ManagerApproval],
        )
        .with_id("default-medium-high-value"),
        BusinessRule::new(
            "Medium value",
            RuleConditions {
                min_amount: Some(1_000.0),
                max_amount: Some(5_000.0),
                ..Default::default()
            },
            vec![RuleAction::ManagerApproval],
        )
        .with_id("default-medium-value"),
        BusinessRule::new(
            "New vendor",
            RuleConditions {
                vendor_status: Some(VendorStatus::New),
                ..Default::default()
            },
            vec![RuleAction::VendorVerification, RuleAction::FlagForReview],
        )
        .with_id("default-new-vendor"),
        BusinessRule::new(
            "Small trusted",
            RuleConditions {
                max_amount: Some(1_000.0),
                min_trust_level: Some(TrustLevel::High),
                ..Default::default()
            },
            vec![RuleAction::AutoApprove],
        )
        .with_id("default-small-trusted"),
    ]
}
