//! 校验 Worker
//!
//! 固定的一组检查（重复、金额合理性、供应商信任、日期、金额核算、PO 引用），
//! 每项检查有最低启用级别；命中预设场景的发票由决策表直接给出问题集。
//! 结果汇总为风险等级，`is_valid` 当且仅当没有问题。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::flavor::ReasoningFlavor;
use super::{Worker, WorkerError, WorkerRole};
use crate::core::context::TaskContext;
use crate::core::plan::{clamp_confidence, StepAction, StepOutput};
use crate::invoice::{Invoice, Scenario, TrustLevel, VendorStatus};

const LARGE_AMOUNT: f64 = 100_000.0;
const PO_REQUIRED_ABOVE: f64 = 5_000.0;
const MATH_TOLERANCE: f64 = 0.01;
const SCENARIO_CONFIDENCE: f64 = 0.95;

/// 校验严格程度（有序：Lenient < Basic < Comprehensive）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Lenient,
    Basic,
    Comprehensive,
}

impl ValidationLevel {
    /// 降一级，最低为 Lenient
    pub fn reduced(&self) -> Self {
        match self {
            ValidationLevel::Comprehensive => ValidationLevel::Basic,
            _ => ValidationLevel::Lenient,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Lenient => "lenient",
            ValidationLevel::Basic => "basic",
            ValidationLevel::Comprehensive => "comprehensive",
        }
    }

    fn base_confidence(&self) -> f64 {
        match self {
            ValidationLevel::Lenient => 0.6,
            ValidationLevel::Basic => 0.8,
            ValidationLevel::Comprehensive => 0.9,
        }
    }

    /// 该级别接受的最低抽取置信度
    fn min_extraction_confidence(&self) -> f64 {
        match self {
            ValidationLevel::Lenient => 0.0,
            ValidationLevel::Basic => 0.3,
            ValidationLevel::Comprehensive => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Duplicate,
    AmountSanity,
    VendorTrust,
    DateSanity,
    Math,
    PoReference,
}

/// 检查项及其最低启用级别
const CHECKS: &[(CheckKind, ValidationLevel)] = &[
    (CheckKind::Duplicate, ValidationLevel::Lenient),
    (CheckKind::Math, ValidationLevel::Lenient),
    (CheckKind::AmountSanity, ValidationLevel::Lenient),
    (CheckKind::DateSanity, ValidationLevel::Basic),
    (CheckKind::VendorTrust, ValidationLevel::Comprehensive),
    (CheckKind::PoReference, ValidationLevel::Comprehensive),
];

/// 场景决策表：场景 -> 固定问题集
const SCENARIO_TABLE: &[(Scenario, &[(CheckKind, Severity, &str)])] = &[
    (
        Scenario::DuplicateSubmission,
        &[(
            CheckKind::Duplicate,
            Severity::Critical,
            "Invoice number already submitted for this vendor",
        )],
    ),
    (
        Scenario::AmountMismatch,
        &[(
            CheckKind::Math,
            Severity::Error,
            "Line item totals do not match invoice amount",
        )],
    ),
    (
        Scenario::UnverifiedVendor,
        &[(
            CheckKind::VendorTrust,
            Severity::Warning,
            "Vendor has not been verified",
        )],
    ),
    (
        Scenario::MissingPurchaseOrder,
        &[(
            CheckKind::PoReference,
            Severity::Warning,
            "No purchase order reference",
        )],
    ),
    (
        Scenario::PriceSpike,
        &[
            (
                CheckKind::AmountSanity,
                Severity::Warning,
                "Amount significantly above vendor history",
            ),
            (
                CheckKind::VendorTrust,
                Severity::Warning,
                "Price change not announced by vendor",
            ),
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub check: CheckKind,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn new(check: CheckKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub risk: RiskTier,
    pub confidence: f64,
    pub level: ValidationLevel,
    pub checks_run: Vec<CheckKind>,
    pub scenario: Option<Scenario>,
    pub reasoning: String,
}

impl ValidationResult {
    fn from_issues(
        issues: Vec<ValidationIssue>,
        confidence: f64,
        level: ValidationLevel,
        checks_run: Vec<CheckKind>,
        scenario: Option<Scenario>,
        reasoning: String,
    ) -> Self {
        Self {
            is_valid: issues.is_empty(),
            risk: assess_risk(&issues),
            confidence: clamp_confidence(confidence),
            issues,
            level,
            checks_run,
            scenario,
            reasoning,
        }
    }

    pub fn issue_messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }
}

/// 任一 Critical 或问题数 >= 3 为高风险；有问题为中风险
pub fn assess_risk(issues: &[ValidationIssue]) -> RiskTier {
    if issues.iter().any(|i| i.severity == Severity::Critical) || issues.len() >= 3 {
        RiskTier::High
    } else if !issues.is_empty() {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// 场景对应的固定问题集
pub fn scenario_issues(scenario: Scenario) -> Vec<ValidationIssue> {
    SCENARIO_TABLE
        .iter()
        .find(|(s, _)| *s == scenario)
        .map(|(_, issues)| {
            issues
                .iter()
                .map(|(check, severity, msg)| ValidationIssue::new(*check, *severity, *msg))
                .collect()
        })
        .unwrap_or_default()
}

pub fn checks_for(level: ValidationLevel) -> Vec<CheckKind> {
    CHECKS
        .iter()
        .filter(|(_, min)| level >= *min)
        .map(|(check, _)| *check)
        .collect()
}

pub fn check_amount(invoice: &Invoice) -> Option<ValidationIssue> {
    if invoice.amount <= 0.0 {
        Some(ValidationIssue::new(
            CheckKind::AmountSanity,
            Severity::Critical,
            format!("Non-positive amount {:.2}", invoice.amount),
        ))
    } else if invoice.amount > LARGE_AMOUNT {
        Some(ValidationIssue::new(
            CheckKind::AmountSanity,
            Severity::Warning,
            format!("Unusually large amount {:.2}", invoice.amount),
        ))
    } else {
        None
    }
}

pub fn check_vendor(invoice: &Invoice) -> Option<ValidationIssue> {
    let vendor = &invoice.vendor;
    match (vendor.status, vendor.trust_level) {
        (VendorStatus::Suspended, _) => Some(ValidationIssue::new(
            CheckKind::VendorTrust,
            Severity::Critical,
            format!("Vendor {} is suspended", vendor.name),
        )),
        (VendorStatus::New, _) => Some(ValidationIssue::new(
            CheckKind::VendorTrust,
            Severity::Warning,
            format!("Vendor {} is new and unverified", vendor.name),
        )),
        (_, TrustLevel::Low) => Some(ValidationIssue::new(
            CheckKind::VendorTrust,
            Severity::Warning,
            format!("Vendor {} has low trust", vendor.name),
        )),
        _ => None,
    }
}

/// 缺失日期时跳过
pub fn check_dates(invoice: &Invoice, today: NaiveDate) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if let Some(date) = invoice.invoice_date {
        if date > today {
            issues.push(ValidationIssue::new(
                CheckKind::DateSanity,
                Severity::Error,
                format!("Invoice dated in the future ({date})"),
            ));
        }
        if let Some(due) = invoice.due_date {
            if due < date {
                issues.push(ValidationIssue::new(
                    CheckKind::DateSanity,
                    Severity::Error,
                    format!("Due date {due} precedes invoice date {date}"),
                ));
            }
        }
    }
    issues
}

pub fn check_math(invoice: &Invoice) -> Option<ValidationIssue> {
    if invoice.line_items.is_empty() {
        return None;
    }
    let sum: f64 = invoice.line_items.iter().map(|i| i.total).sum();
    let bad_line = invoice
        .line_items
        .iter()
        .find(|i| (i.quantity * i.unit_price - i.total).abs() > MATH_TOLERANCE);
    if let Some(line) = bad_line {
        return Some(ValidationIssue::new(
            CheckKind::Math,
            Severity::Error,
            format!("Line '{}' total does not equal quantity x price", line.description),
        ));
    }
    if (sum - invoice.amount).abs() > MATH_TOLERANCE {
        return Some(ValidationIssue::new(
            CheckKind::Math,
            Severity::Error,
            format!("Line items sum to {sum:.2} but invoice amount is {:.2}", invoice.amount),
        ));
    }
    None
}

pub fn check_po(invoice: &Invoice) -> Option<ValidationIssue> {
    let missing = invoice.po_number.as_deref().map_or(true, |p| p.trim().is_empty());
    if missing && invoice.amount > PO_REQUIRED_ABOVE {
        Some(ValidationIssue::new(
            CheckKind::PoReference,
            Severity::Warning,
            format!("No purchase order for amount above {PO_REQUIRED_ABOVE:.0}"),
        ))
    } else {
        None
    }
}

pub struct ValidatorWorker {
    /// (供应商 id, 发票号) -> 首次提交的发票 id
    seen: Mutex<HashMap<(String, String), String>>,
    today: Option<NaiveDate>,
    flavor: Arc<dyn ReasoningFlavor>,
}

impl ValidatorWorker {
    pub fn new(flavor: Arc<dyn ReasoningFlavor>) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            today: None,
            flavor,
        }
    }

    /// 固定「今天」，用于日期检查的确定性
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// 登记并检查重复；同一发票 id 重复校验不算重复
    fn check_duplicate(&self, invoice: &Invoice) -> Option<ValidationIssue> {
        let key = (invoice.vendor.id.clone(), invoice.invoice_number.clone());
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match seen.get(&key) {
            Some(first) if *first != invoice.id => Some(ValidationIssue::new(
                CheckKind::Duplicate,
                Severity::Critical,
                format!("Duplicate of invoice {first}"),
            )),
            Some(_) => None,
            None => {
                seen.insert(key, invoice.id.clone());
                None
            }
        }
    }

    pub fn validate(&self, invoice: &Invoice, level: ValidationLevel) -> ValidationResult {
        if let Some(scenario) = invoice.scenario {
            let issues = scenario_issues(scenario);
            let reasoning = self.flavor.phrase(
                WorkerRole::Validator,
                &format!("scenario {scenario:?} yields {} issue(s)", issues.len()),
            );
            let checks: Vec<CheckKind> = issues.iter().map(|i| i.check).collect();
            return ValidationResult::from_issues(
                issues,
                SCENARIO_CONFIDENCE,
                level,
                checks,
                Some(scenario),
                reasoning,
            );
        }

        let checks = checks_for(level);
        let mut issues = Vec::new();
        for check in &checks {
            match check {
                CheckKind::Duplicate => issues.extend(self.check_duplicate(invoice)),
                CheckKind::AmountSanity => issues.extend(check_amount(invoice)),
                CheckKind::VendorTrust => issues.extend(check_vendor(invoice)),
                CheckKind::DateSanity => issues.extend(check_dates(invoice, self.today())),
                CheckKind::Math => issues.extend(check_math(invoice)),
                CheckKind::PoReference => issues.extend(check_po(invoice)),
            }
        }
        let confidence = level.base_confidence() - 0.05 * issues.len() as f64;
        let reasoning = self.flavor.phrase(
            WorkerRole::Validator,
            &format!(
                "{} check(s) at {} level, {} issue(s)",
                checks.len(),
                level.as_str(),
                issues.len()
            ),
        );
        ValidationResult::from_issues(issues, confidence, level, checks, None, reasoning)
    }
}

#[async_trait]
impl Worker for ValidatorWorker {
    fn role(&self) -> WorkerRole {
        WorkerRole::Validator
    }

    async fn run(
        &self,
        action: StepAction,
        input: &Value,
        ctx: &TaskContext,
    ) -> Result<StepOutput, WorkerError> {
        if action != StepAction::Validate {
            return Err(WorkerError::UnsupportedAction {
                role: self.role(),
                action,
            });
        }
        let level: ValidationLevel = match input.get("level") {
            Some(l) => serde_json::from_value(l.clone())
                .map_err(|e| WorkerError::InvalidInput(format!("level: {e}")))?,
            None => ValidationLevel::Basic,
        };
        let extraction = ctx
            .extraction()
            .ok_or(WorkerError::MissingUpstream(WorkerRole::Extractor))?;
        if extraction.confidence < level.min_extraction_confidence() {
            return Err(WorkerError::Failed(format!(
                "extraction confidence {:.2} too low for {} validation",
                extraction.confidence,
                level.as_str()
            )));
        }

        let delay = self.flavor.thinking_delay(self.role());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.validate(&ctx.invoice, level);
        tracing::debug!(
            subject_id = %ctx.subject_id,
            level = level.as_str(),
            issues = result.issues.len(),
            risk = ?result.risk,
            "Validation finished"
        );
        StepOutput::from_typed(&result, result.confidence)
            .map_err(|e| WorkerError::Failed(format!("serialize validation: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{LineItem, Vendor};
    use crate::workers::extractor::{ExtractedFields, ExtractionResult, ExtractionStrategy};
    use crate::workers::flavor::NoFlavor;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn clean_invoice(id: &str, amount: f64) -> Invoice {
        Invoice::new(id, "N-100", Vendor::new("v1", "Acme", TrustLevel::High), amount)
            .with_dates(date(2026, 3, 1), date(2026, 4, 1))
            .with_po("PO-9")
            .with_line_items(vec![LineItem::new("Service", 1.0, amount)])
    }

    fn validator() -> ValidatorWorker {
        ValidatorWorker::new(Arc::new(NoFlavor)).with_today(date(2026, 6, 1))
    }

    fn ctx_with_extraction(invoice: Invoice, confidence: f64) -> TaskContext {
        let mut ctx = TaskContext::new(Arc::new(invoice.clone()));
        let extraction = ExtractionResult {
            fields: ExtractedFields::from_invoice(&invoice),
            strategy: ExtractionStrategy::Text,
            confidence,
            provider: "test".to_string(),
            tried_strategies: vec![ExtractionStrategy::Text],
            reasoning: String::new(),
        };
        ctx.record(
            WorkerRole::Extractor,
            StepOutput::from_typed(&extraction, confidence).unwrap(),
        );
        ctx
    }

    #[test]
    fn test_clean_invoice_is_valid() {
        let result = validator().validate(&clean_invoice("a", 300.0), ValidationLevel::Comprehensive);
        assert!(result.is_valid);
        assert!(result.issues.is_empty());
        assert_eq!(result.risk, RiskTier::Low);
        assert_eq!(result.checks_run.len(), 6);
        assert!((result.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_checks_by_level() {
        assert_eq!(checks_for(ValidationLevel::Lenient).len(), 3);
        assert_eq!(checks_for(ValidationLevel::Basic).len(), 4);
        assert!(!checks_for(ValidationLevel::Basic).contains(&CheckKind::PoReference));
        assert_eq!(ValidationLevel::Comprehensive.reduced(), ValidationLevel::Basic);
        assert_eq!(ValidationLevel::Lenient.reduced(), ValidationLevel::Lenient);
    }

    #[test]
    fn test_duplicate_detection() {
        let v = validator();
        assert!(v.validate(&clean_invoice("a", 300.0), ValidationLevel::Basic).is_valid);
        // 同一发票再次校验不算重复
        assert!(v.validate(&clean_invoice("a", 300.0), ValidationLevel::Basic).is_valid);
        let dup = v.validate(&clean_invoice("b", 300.0), ValidationLevel::Basic);
        assert!(!dup.is_valid);
        assert_eq!(dup.issues[0].check, CheckKind::Duplicate);
        assert_eq!(dup.risk, RiskTier::High);
    }

    #[test]
    fn test_math_and_dates() {
        let mut inv = clean_invoice("a", 300.0);
        inv.line_items = vec![LineItem::new("Service", 1.0, 250.0)];
        inv.invoice_date = Some(date(2026, 7, 1));
        inv.due_date = Some(date(2026, 6, 15));
        let result = validator().validate(&inv, ValidationLevel::Basic);
        let kinds: Vec<CheckKind> = result.issues.iter().map(|i| i.check).collect();
        assert_eq!(
            kinds,
            vec![CheckKind::Math, CheckKind::DateSanity, CheckKind::DateSanity]
        );
        assert_eq!(result.risk, RiskTier::High);
        assert!(result.confidence >= 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_po_and_vendor_checks() {
        let mut inv = clean_invoice("a", 8_000.0);
        inv.po_number = None;
        inv.vendor = Vendor::new("v2", "Newco", TrustLevel::Medium).with_status(VendorStatus::New);
        let result = validator().validate(&inv, ValidationLevel::Comprehensive);
        assert_eq!(result.issues.len(), 2);
        assert_eq!(result.risk, RiskTier::Medium);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_scenario_short_circuit() {
        let inv = clean_invoice("a", 300.0).with_scenario(Scenario::PriceSpike);
        let result = validator().validate(&inv, ValidationLevel::Basic);
        assert_eq!(result.scenario, Some(Scenario::PriceSpike));
        assert_eq!(result.issues.len(), 2);
        assert_eq!(result.risk, RiskTier::Medium);
        assert_eq!(result.confidence, SCENARIO_CONFIDENCE);
        for (scenario, _) in SCENARIO_TABLE {
            assert!(!scenario_issues(*scenario).is_empty());
        }
        assert_eq!(
            assess_risk(&scenario_issues(Scenario::DuplicateSubmission)),
            RiskTier::High
        );
    }

    #[tokio::test]
    async fn test_run_requires_extraction() {
        let ctx = TaskContext::new(Arc::new(clean_invoice("a", 300.0)));
        let err = validator()
            .run(StepAction::Validate, &json!({"level": "basic"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::MissingUpstream(WorkerRole::Extractor)));
    }

    #[tokio::test]
    async fn test_low_extraction_confidence_fails_comprehensive_only() {
        let ctx = ctx_with_extraction(clean_invoice("a", 300.0), 0.45);
        let v = validator();
        assert!(v
            .run(StepAction::Validate, &json!({"level": "comprehensive"}), &ctx)
            .await
            .is_err());
        let out = v
            .run(StepAction::Validate, &json!({"level": "basic"}), &ctx)
            .await
            .unwrap();
        let result: ValidationResult = serde_json::from_value(out.data).unwrap();
        assert_eq!(result.level, ValidationLevel::Basic);
        assert!(result.is_valid);
    }
}
