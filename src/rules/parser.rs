//! 自然语言规则解析
//!
//! 基于关键词与正则的启发式解析：从一句话中抽取金额阈值、信任度、供应商状态、
//! 重复检查窗口与动作。短语到条件的映射是固定表，修改需同步更新 fixture 测试。
//!
//! | 短语 | 条件 |
//! |---|---|
//! | `between $X and $Y` | `X <= amount < Y` |
//! | `less than / under / below $X` | `amount < X` |
//! | `exceed(s) / over / above / more than / greater than $X` | `amount > X` |
//!
//! 句中出现金额却没有匹配到金额子句，或上下界矛盾时，规则以停用状态返回，置信度取下限。

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use super::types::{derive_priority, BusinessRule, RuleAction, RuleConditions};
use crate::invoice::{TrustLevel, VendorStatus};

const BASE_CONFIDENCE: f64 = 0.4;
const AMOUNT_CLAUSE_BONUS: f64 = 0.15;
const TRUST_BONUS: f64 = 0.15;
const VENDOR_STATUS_BONUS: f64 = 0.1;
const DUPLICATE_WINDOW_BONUS: f64 = 0.1;
const ACTION_BONUS: f64 = 0.2;
const MAX_CONFIDENCE: f64 = 0.95;
/// 未识别出动作或金额无法解析时的置信度下限
const FLOOR_CONFIDENCE: f64 = 0.3;

/// 动作关键词表：(正则, 动作)
const ACTION_KEYWORDS: &[(&str, RuleAction)] = &[
    (r"\b(?:reject|deny|block)\b", RuleAction::Reject),
    (r"\b(?:executive|cfo|director)\b", RuleAction::ExecutiveApproval),
    (r"\bmanager\b", RuleAction::ManagerApproval),
    (r"\bmanual(?:ly)? review\b|\breview manually\b", RuleAction::ManualReview),
    (r"\bverif(?:y|ication)\b", RuleAction::VendorVerification),
    (r"\bflag(?: for review)?\b", RuleAction::FlagForReview),
    (
        r"\bapprove(?:d)? automatically\b|\bauto[- ]?approved?\b|\bautomatically approved?\b",
        RuleAction::AutoApprove,
    ),
];

const NUMBER: &str = r"\$?\s*([\d,]+(?:\.\d+)?)\s*(k)?\b";

struct Patterns {
    between: Regex,
    below: Regex,
    above: Regex,
    trust: Regex,
    trusted: Regex,
    amount_mention: Regex,
    duplicate_window: Regex,
    actions: Vec<(Regex, RuleAction)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("invalid rule pattern {p}: {e}"));
        Patterns {
            between: compile(&format!(r"between\s+{NUMBER}\s+and\s+{NUMBER}")),
            below: compile(&format!(r"(?:less than|under|below)\s+{NUMBER}")),
            above: compile(&format!(
                r"(?:exceed(?:s|ed|ing)?|over|above|more than|greater than)\s+{NUMBER}"
            )),
            trust: compile(r"trust(?:\s+level)?\s+(?:is\s+)?(high|medium|low)|(high|medium|low)[\s-]trust"),
            trusted: compile(r"\btrusted vendor"),
            amount_mention: compile(r"\$\s*\d"),
            duplicate_window: compile(r"within\s+(\d+)\s+days?"),
            actions: ACTION_KEYWORDS
                .iter()
                .map(|(p, action)| (compile(p), *action))
                .collect(),
        }
    })
}

fn parse_amount(digits: &str, suffix: Option<&str>) -> Option<f64> {
    let value: f64 = digits.replace(',', "").parse().ok()?;
    Some(if suffix.is_some() { value * 1_000.0 } else { value })
}

/// 解析结果（规则 + 匹配到的子句，便于调试）
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub rule: BusinessRule,
    pub matched_clauses: Vec<String>,
    /// 无法落地的子句；非空时规则为停用状态
    pub unresolved: Vec<String>,
}

/// 将一句话解析为规则
///
/// 未识别出动作时强制为 `manual_review` 且置信度降到下限。
/// 金额子句缺失或矛盾时规则停用，避免生成对所有发票生效的无条件规则。
pub fn parse_rule_text(sentence: &str) -> ParsedRule {
    let p = patterns();
    let text = sentence.trim().to_lowercase();
    let mut conditions = RuleConditions::default();
    let mut matched = Vec::new();
    let mut confidence = BASE_CONFIDENCE;

    if let Some(c) = p.between.captures(&text) {
        let low = parse_amount(&c[1], c.get(2).map(|m| m.as_str()));
        let high = parse_amount(&c[3], c.get(4).map(|m| m.as_str()));
        if let (Some(low), Some(high)) = (low, high) {
            conditions.min_amount = Some(low.min(high));
            conditions.max_amount = Some(low.max(high));
            confidence += AMOUNT_CLAUSE_BONUS;
            matched.push(c[0].to_string());
        }
    }
    if conditions.max_amount.is_none() {
        if let Some(c) = p.below.captures(&text) {
            if let Some(v) = parse_amount(&c[1], c.get(2).map(|m| m.as_str())) {
                conditions.max_amount = Some(v);
                confidence += AMOUNT_CLAUSE_BONUS;
                matched.push(c[0].to_string());
            }
        }
    }
    if conditions.min_amount.is_none() {
        if let Some(c) = p.above.captures(&text) {
            if let Some(v) = parse_amount(&c[1], c.get(2).map(|m| m.as_str())) {
                conditions.min_amount = Some(v);
                conditions.min_exclusive = true;
                confidence += AMOUNT_CLAUSE_BONUS;
                matched.push(c[0].to_string());
            }
        }
    }

    let mut unresolved = Vec::new();
    match (conditions.min_amount, conditions.max_amount) {
        (None, None) if p.amount_mention.is_match(&text) => {
            unresolved.push("amount mentioned without a recognised amount clause".to_string());
        }
        (Some(min), Some(max)) if min >= max => {
            unresolved.push(format!("contradictory amount bounds {min} and {max}"));
        }
        _ => {}
    }

    if let Some(c) = p.trust.captures(&text) {
        let level = c.get(1).or_else(|| c.get(2)).and_then(|m| TrustLevel::parse(m.as_str()));
        if let Some(level) = level {
            conditions.min_trust_level = Some(level);
            confidence += TRUST_BONUS;
            matched.push(c[0].to_string());
        }
    } else if let Some(m) = p.trusted.find(&text) {
        conditions.min_trust_level = Some(TrustLevel::High);
        confidence += TRUST_BONUS;
        matched.push(m.as_str().to_string());
    }

    let status = if text.contains("new vendor") {
        Some(VendorStatus::New)
    } else if text.contains("suspended vendor") || text.contains("vendor is suspended") {
        Some(VendorStatus::Suspended)
    } else if text.contains("established vendor") {
        Some(VendorStatus::Established)
    } else {
        None
    };
    if let Some(status) = status {
        conditions.vendor_status = Some(status);
        confidence += VENDOR_STATUS_BONUS;
        matched.push(format!("{} vendor", status.as_str()));
    }

    if text.contains("duplicate") {
        if let Some(c) = p.duplicate_window.captures(&text) {
            if let Ok(days) = c[1].parse::<u32>() {
                conditions.duplicate_window_days = Some(days);
                confidence += DUPLICATE_WINDOW_BONUS;
                matched.push(c[0].to_string());
            }
        }
    }

    let mut found = BTreeSet::new();
    for (re, action) in &p.actions {
        if let Some(m) = re.find(&text) {
            found.insert(*action);
            matched.push(m.as_str().to_string());
        }
    }
    let actions: Vec<RuleAction> = if found.is_empty() {
        confidence = FLOOR_CONFIDENCE;
        vec![RuleAction::ManualReview]
    } else {
        confidence += ACTION_BONUS;
        found.into_iter().collect()
    };
    if !unresolved.is_empty() {
        confidence = FLOOR_CONFIDENCE;
    }

    let rule = BusinessRule {
        id: uuid::Uuid::new_v4().to_string(),
        name: rule_name(sentence),
        natural_language_source: Some(sentence.trim().to_string()),
        priority: derive_priority(&actions),
        conditions,
        actions,
        active: unresolved.is_empty(),
        confidence: confidence.min(MAX_CONFIDENCE),
        created_at: Utc::now(),
    };

    ParsedRule {
        rule,
        matched_clauses: matched,
        unresolved,
    }
}

fn rule_name(sentence: &str) -> String {
    let trimmed = sentence.trim();
    let short: String = trimmed.chars().take(48).collect();
    if short.len() < trimmed.len() {
        format!("{short}...")
    } else {
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auto_approve_small_trusted() {
        let parsed = parse_rule_text(
            "If invoice amount is less than $1000 and vendor trust level is high, approve automatically",
        );
        let rule = parsed.rule;
        assert_eq!(rule.conditions.max_amount, Some(1_000.0));
        assert_eq!(rule.conditions.min_amount, None);
        assert_eq!(rule.conditions.min_trust_level, Some(TrustLevel::High));
        assert_eq!(rule.actions, vec![RuleAction::AutoApprove]);
        assert_eq!(rule.priority, 7);
        assert!((rule.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_between_with_commas() {
        let rule = parse_rule_text(
            "Invoices between $5,000 and $10,000 require manager approval",
        )
        .rule;
        assert_eq!(rule.conditions.min_amount, Some(5_000.0));
        assert_eq!(rule.conditions.max_amount, Some(10_000.0));
        assert_eq!(rule.actions, vec![RuleAction::ManagerApproval]);
        assert_eq!(rule.priority, 3);
    }

    #[test]
    fn test_parse_exceeds_with_k_suffix() {
        let rule = parse_rule_text("Any invoice that exceeds $25k needs executive sign-off").rule;
        assert_eq!(rule.conditions.min_amount, Some(25_000.0));
        assert!(rule.conditions.min_exclusive);
        assert_eq!(rule.actions, vec![RuleAction::ExecutiveApproval]);
    }

    #[test]
    fn test_parse_plural_exceed() {
        let parsed = parse_rule_text("Invoices that exceed $10000 need executive approval");
        let rule = parsed.rule;
        assert!(parsed.unresolved.is_empty());
        assert!(rule.active);
        assert_eq!(rule.conditions.min_amount, Some(10_000.0));
        assert!(rule.conditions.min_exclusive);
        assert_eq!(rule.conditions.max_amount, None);
        assert_eq!(rule.actions, vec![RuleAction::ExecutiveApproval]);
    }

    #[test]
    fn test_parse_passive_auto_approval() {
        let rule = parse_rule_text("Invoices under $500 are automatically approved").rule;
        assert_eq!(rule.conditions.max_amount, Some(500.0));
        assert_eq!(rule.actions, vec![RuleAction::AutoApprove]);
        assert!(rule.confidence > FLOOR_CONFIDENCE);
    }

    #[test]
    fn test_unrecognised_amount_clause_yields_inactive_rule() {
        let parsed = parse_rule_text("Invoices around $750 need manager approval");
        let rule = parsed.rule;
        assert_eq!(parsed.unresolved.len(), 1);
        assert!(!rule.active);
        assert_eq!(rule.conditions.min_amount, None);
        assert_eq!(rule.conditions.max_amount, None);
        assert_eq!(rule.actions, vec![RuleAction::ManagerApproval]);
        assert!((rule.confidence - FLOOR_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_contradictory_bounds_yield_inactive_rule() {
        for sentence in [
            "Invoices between $1000 and $1000 need manager approval",
            "Invoices that exceed $5000 and are less than $1000 need manager approval",
        ] {
            let parsed = parse_rule_text(sentence);
            assert_eq!(parsed.unresolved.len(), 1, "{sentence}");
            assert!(!parsed.rule.active, "{sentence}");
            assert!((parsed.rule.confidence - FLOOR_CONFIDENCE).abs() < 1e-9);
        }
    }

    #[test]
    fn test_parse_new_vendor_multiple_actions_sorted() {
        let rule = parse_rule_text("Flag invoices from a new vendor and require verification").rule;
        assert_eq!(rule.conditions.vendor_status, Some(VendorStatus::New));
        assert_eq!(
            rule.actions,
            vec![RuleAction::VendorVerification, RuleAction::FlagForReview]
        );
        assert_eq!(rule.priority, 5);
    }

    #[test]
    fn test_parse_duplicate_window() {
        let rule = parse_rule_text("Reject duplicate invoices within 30 days").rule;
        assert_eq!(rule.conditions.duplicate_window_days, Some(30));
        assert_eq!(rule.actions, vec![RuleAction::Reject]);
        assert_eq!(rule.priority, 1);
    }

    #[test]
    fn test_window_ignored_without_duplicate_phrase() {
        let rule = parse_rule_text("Reject invoices due within 5 days").rule;
        assert_eq!(rule.conditions.duplicate_window_days, None);
    }

    #[test]
    fn test_parse_without_action_falls_back_to_manual_review() {
        let parsed = parse_rule_text("Invoices over $500 from medium trust vendors");
        let rule = parsed.rule;
        assert_eq!(rule.actions, vec![RuleAction::ManualReview]);
        assert!((rule.confidence - FLOOR_CONFIDENCE).abs() < 1e-9);
        assert_eq!(rule.conditions.min_amount, Some(500.0));
        assert_eq!(rule.conditions.min_trust_level, Some(TrustLevel::Medium));
    }

    #[test]
    fn test_confidence_grows_with_clauses() {
        let sparse = parse_rule_text("Reject it").rule.confidence;
        let rich = parse_rule_text("Reject invoices over $100 from a new vendor").rule.confidence;
        assert!(rich > sparse);
        assert!(rich <= MAX_CONFIDENCE);
    }

    #[test]
    fn test_source_and_name_preserved() {
        let sentence = "  Invoices under $200 from a trusted vendor can be auto-approved  ";
        let rule = parse_rule_text(sentence).rule;
        assert_eq!(rule.natural_language_source.as_deref(), Some(sentence.trim()));
        assert_eq!(rule.conditions.min_trust_level, Some(TrustLevel::High));
        assert_eq!(rule.actions, vec![RuleAction::AutoApprove]);
        assert!(rule.name.ends_with("..."));
    }
}
