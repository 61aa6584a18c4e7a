//! 业务规则：类型、自然语言解析、规则引擎

pub mod engine;
pub mod parser;
pub mod types;

pub use engine::{consolidate, default_rules, BusinessRuleEngine};
pub use parser::{parse_rule_text, ParsedRule};
pub use types::{
    derive_priority, BusinessRule, ConditionCheck, RuleAction, RuleConditions, RuleContext,
    RuleError, RuleEvaluation, RuleExplanation, RuleId, RuleMatch, RulePatch,
};
