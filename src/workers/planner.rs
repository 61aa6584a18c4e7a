//! 协调者：评估复杂度并生成固定三步计划（Extract -> Validate -> Route）

use std::sync::Arc;

use serde_json::json;

use super::flavor::ReasoningFlavor;
use super::WorkerRole;
use crate::core::context::TaskContext;
use crate::core::plan::{Complexity, Plan, Step, StepAction};
use crate::invoice::Invoice;
use crate::workers::extractor::ExtractionMethod;
use crate::workers::validator::ValidationLevel;

const COMPLEX_AMOUNT: f64 = 5_000.0;
const EXCEPTIONAL_AMOUNT: f64 = 10_000.0;

/// 复杂度分级：金额 > 10000 为 Exceptional；金额 > 5000、新供应商或已标记为 Complex
pub fn assess_complexity(invoice: &Invoice) -> Complexity {
    if invoice.amount > EXCEPTIONAL_AMOUNT {
        Complexity::Exceptional
    } else if invoice.amount > COMPLEX_AMOUNT || invoice.vendor.is_new() || invoice.flagged {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}

pub struct CoordinatorWorker {
    flavor: Arc<dyn ReasoningFlavor>,
}

impl CoordinatorWorker {
    pub fn new(flavor: Arc<dyn ReasoningFlavor>) -> Self {
        Self { flavor }
    }

    pub fn role(&self) -> WorkerRole {
        WorkerRole::Coordinator
    }

    pub async fn plan(&self, invoice: &Invoice, ctx: &TaskContext) -> Plan {
        let delay = self.flavor.thinking_delay(self.role());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let complexity = assess_complexity(invoice);
        let (method, level) = match complexity {
            Complexity::Simple => (ExtractionMethod::PdfText, ValidationLevel::Basic),
            _ => (ExtractionMethod::MultiMethod, ValidationLevel::Comprehensive),
        };
        let steps = vec![
            Step::new(StepAction::Extract, json!({ "method": method })),
            Step::new(StepAction::Validate, json!({ "level": level })),
            Step::new(StepAction::Route, json!({ "complexity": complexity })),
        ];
        let reasoning = self.flavor.phrase(
            self.role(),
            &format!(
                "{} invoice of {:.2} {} from {} ({} vendor, trust {})",
                complexity.as_str(),
                invoice.amount,
                invoice.currency,
                invoice.vendor.name,
                invoice.vendor.status.as_str(),
                invoice.vendor.trust_level.as_str()
            ),
        );
        tracing::debug!(
            subject_id = %ctx.subject_id,
            session_id = %ctx.session_id,
            complexity = complexity.as_str(),
            "Plan created"
        );
        Plan::new(&invoice.id, complexity, steps, reasoning)
    }
}
