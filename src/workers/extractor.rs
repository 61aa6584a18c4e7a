//! 文档抽取 Worker
//!
//! 根据文档类型与质量确定策略偏好顺序，跳过已尝试过的策略；抽取结果的置信度
//! 按识别出的字段累加并封顶。提供者缺失时降级为模板化表头读取。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::flavor::ReasoningFlavor;
use super::{Worker, WorkerError, WorkerRole};
use crate::core::context::TaskContext;
use crate::core::plan::{StepAction, StepOutput};
use crate::invoice::{DocumentInfo, DocumentQuality, DocumentType, Invoice, LineItem};
use crate::providers::ExtractionProvider;

/// 模板化降级读取的置信度折扣
const FALLBACK_PENALTY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Text,
    Ocr,
    Template,
    Hybrid,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Text => "text",
            ExtractionStrategy::Ocr => "ocr",
            ExtractionStrategy::Template => "template",
            ExtractionStrategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划给出的抽取方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfText,
    MultiMethod,
}

/// 策略偏好顺序
pub fn strategy_preference(doc: &DocumentInfo, method: ExtractionMethod) -> Vec<ExtractionStrategy> {
    use ExtractionStrategy::*;
    let mut order = if doc.doc_type == DocumentType::Scanned {
        vec![Ocr, Hybrid]
    } else if doc.quality == DocumentQuality::Low {
        vec![Hybrid, Ocr, Text]
    } else if doc.template_known {
        vec![Template, Text, Hybrid]
    } else {
        vec![Text, Hybrid, Ocr]
    };
    if method == ExtractionMethod::PdfText {
        if let Some(pos) = order.iter().position(|s| *s == Text) {
            let text = order.remove(pos);
            order.insert(0, text);
        }
    }
    order
}

/// 第一个尚未尝试的偏好策略
pub fn choose_strategy(
    doc: &DocumentInfo,
    method: ExtractionMethod,
    tried: &[ExtractionStrategy],
) -> Option<ExtractionStrategy> {
    strategy_preference(doc, method)
        .into_iter()
        .find(|s| !tried.contains(s))
}

/// 从步骤输入解析方法与已尝试策略
pub fn parse_input(input: &Value) -> Result<(ExtractionMethod, Vec<ExtractionStrategy>), WorkerError> {
    let method = match input.get("method") {
        Some(m) => serde_json::from_value(m.clone())
            .map_err(|e| WorkerError::InvalidInput(format!("method: {e}")))?,
        None => ExtractionMethod::MultiMethod,
    };
    let tried = match input.get("tried_strategies") {
        Some(t) => serde_json::from_value(t.clone())
            .map_err(|e| WorkerError::InvalidInput(format!("tried_strategies: {e}")))?,
        None => Vec::new(),
    };
    Ok((method, tried))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub invoice_number: Option<String>,
    pub vendor_name: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub po_number: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl ExtractedFields {
    pub fn from_invoice(invoice: &Invoice) -> Self {
        Self {
            invoice_number: Some(invoice.invoice_number.clone()).filter(|n| !n.is_empty()),
            vendor_name: Some(invoice.vendor.name.clone()).filter(|n| !n.is_empty()),
            amount: Some(invoice.amount),
            currency: Some(invoice.currency.clone()),
            invoice_date: invoice.invoice_date,
            due_date: invoice.due_date,
            po_number: invoice.po_number.clone(),
            line_items: invoice.line_items.clone(),
        }
    }

    /// 仅表头字段（编号、供应商、金额、币种）
    pub fn header_only(invoice: &Invoice) -> Self {
        let full = Self::from_invoice(invoice);
        Self {
            invoice_number: full.invoice_number,
            vendor_name: full.vendor_name,
            amount: full.amount,
            currency: full.currency,
            ..Default::default()
        }
    }

    /// 按识别出的字段累加置信度，封顶 1.0
    pub fn field_confidence(&self) -> f64 {
        let mut c: f64 = 0.0;
        if self.invoice_number.is_some() {
            c += 0.2;
        }
        if self.vendor_name.is_some() {
            c += 0.2;
        }
        if self.amount.is_some() {
            c += 0.25;
        }
        if self.invoice_date.is_some() || self.due_date.is_some() {
            c += 0.15;
        }
        if !self.line_items.is_empty() {
            c += 0.1;
        }
        if self.po_number.is_some() {
            c += 0.1;
        }
        c.min(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fields: ExtractedFields,
    pub strategy: ExtractionStrategy,
    pub confidence: f64,
    pub provider: String,
    pub tried_strategies: Vec<ExtractionStrategy>,
    pub reasoning: String,
}

pub struct ExtractorWorker {
    provider: Option<Arc<dyn ExtractionProvider>>,
    flavor: Arc<dyn ReasoningFlavor>,
}

impl ExtractorWorker {
    pub fn new(provider: Option<Arc<dyn ExtractionProvider>>, flavor: Arc<dyn ReasoningFlavor>) -> Self {
        Self { provider, flavor }
    }

    pub async fn extract(
        &self,
        invoice: &Invoice,
        method: ExtractionMethod,
        mut tried: Vec<ExtractionStrategy>,
    ) -> Result<ExtractionResult, WorkerError> {
        let strategy = choose_strategy(&invoice.document, method, &tried)
            .ok_or_else(|| WorkerError::StrategiesExhausted(tried.clone()))?;

        let (fields, confidence, provider) = match &self.provider {
            Some(p) => {
                let fields = p.extract(invoice, strategy).await.map_err(|e| {
                    WorkerError::StrategyFailed {
                        strategy,
                        reason: e.to_string(),
                    }
                })?;
                let confidence = fields.field_confidence();
                (fields, confidence, p.name().to_string())
            }
            None => {
                let fields = ExtractedFields::header_only(invoice);
                let confidence = fields.field_confidence() * FALLBACK_PENALTY;
                (fields, confidence, "template_fallback".to_string())
            }
        };

        tried.push(strategy);
        let reasoning = self.flavor.phrase(
            WorkerRole::Extractor,
            &format!("read with {strategy} via {provider}, confidence {confidence:.2}"),
        );
        Ok(ExtractionResult {
            fields,
            strategy,
            confidence,
            provider,
            tried_strategies: tried,
            reasoning,
        })
    }
}

#[async_trait]
impl Worker for ExtractorWorker {
    fn role(&self) -> WorkerRole {
        WorkerRole::Extractor
    }

    async fn run(
        &self,
        action: StepAction,
        input: &Value,
        ctx: &TaskContext,
    ) -> Result<StepOutput, WorkerError> {
        if action != StepAction::Extract {
            return Err(WorkerError::UnsupportedAction {
                role: self.role(),
                action,
            });
        }
        let (method, tried) = parse_input(input)?;
        let delay = self.flavor.thinking_delay(self.role());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self.extract(&ctx.invoice, method, tried).await?;
        tracing::debug!(
            subject_id = %ctx.subject_id,
            strategy = %result.strategy,
            confidence = result.confidence,
            "Extraction finished"
        );
        StepOutput::from_typed(&result, result.confidence)
            .map_err(|e| WorkerError::Failed(format!("serialize extraction: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{TrustLevel, Vendor};
    use crate::providers::DeclaredFieldsProvider;
    use crate::workers::flavor::NoFlavor;
    use serde_json::json;

    fn invoice(doc: DocumentInfo) -> Invoice {
        Invoice::new("inv-1", "N-1", Vendor::new("v1", "Acme", TrustLevel::High), 100.0)
            .with_dates(
                NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
            )
            .with_po("PO-1")
            .with_line_items(vec![LineItem::new("Widget", 2.0, 50.0)])
            .with_document(doc)
    }

    fn worker(with_provider: bool) -> ExtractorWorker {
        let provider: Option<Arc<dyn ExtractionProvider>> = if with_provider {
            Some(Arc::new(DeclaredFieldsProvider::new()))
        } else {
            None
        };
        ExtractorWorker::new(provider, Arc::new(NoFlavor))
    }

    #[test]
    fn test_strategy_preference_table() {
        use ExtractionStrategy::*;
        let scanned = DocumentInfo {
            doc_type: DocumentType::Scanned,
            ..Default::default()
        };
        assert_eq!(strategy_preference(&scanned, ExtractionMethod::PdfText), vec![Ocr, Hybrid]);

        let templated = DocumentInfo {
            template_known: true,
            ..Default::default()
        };
        assert_eq!(
            strategy_preference(&templated, ExtractionMethod::MultiMethod),
            vec![Template, Text, Hybrid]
        );
        assert_eq!(
            strategy_preference(&templated, ExtractionMethod::PdfText),
            vec![Text, Template, Hybrid]
        );
    }

    #[test]
    fn test_choose_strategy_skips_tried() {
        use ExtractionStrategy::*;
        let doc = DocumentInfo::default();
        assert_eq!(choose_strategy(&doc, ExtractionMethod::MultiMethod, &[]), Some(Text));
        assert_eq!(choose_strategy(&doc, ExtractionMethod::MultiMethod, &[Text]), Some(Hybrid));
        assert_eq!(
            choose_strategy(&doc, ExtractionMethod::MultiMethod, &[Text, Hybrid, Ocr]),
            None
        );
    }

    #[test]
    fn test_field_confidence_additive_capped() {
        let inv = invoice(DocumentInfo::default());
        assert!((ExtractedFields::from_invoice(&inv).field_confidence() - 1.0).abs() < 1e-9);
        assert!((ExtractedFields::header_only(&inv).field_confidence() - 0.65).abs() < 1e-9);
        assert_eq!(ExtractedFields::default().field_confidence(), 0.0);
    }

    #[tokio::test]
    async fn test_run_with_provider() {
        let ctx = TaskContext::new(Arc::new(invoice(DocumentInfo::default())));
        let out = worker(true)
            .run(StepAction::Extract, &json!({"method": "pdf_text"}), &ctx)
            .await
            .unwrap();
        let result: ExtractionResult = serde_json::from_value(out.data).unwrap();
        assert_eq!(result.strategy, ExtractionStrategy::Text);
        assert_eq!(result.tried_strategies, vec![ExtractionStrategy::Text]);
        assert!((out.confidence - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_without_provider_penalized() {
        let ctx = TaskContext::new(Arc::new(invoice(DocumentInfo::default())));
        let out = worker(false)
            .run(StepAction::Extract, &json!({}), &ctx)
            .await
            .unwrap();
        let result: ExtractionResult = serde_json::from_value(out.data).unwrap();
        assert_eq!(result.provider, "template_fallback");
        assert!((out.confidence - 0.65 * FALLBACK_PENALTY).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_provider_failure_names_strategy() {
        let ctx = TaskContext::new(Arc::new(invoice(DocumentInfo {
            doc_type: DocumentType::Scanned,
            quality: DocumentQuality::Low,
            template_known: false,
        })));
        let err = worker(true)
            .run(StepAction::Extract, &json!({"method": "multi_method"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::StrategyFailed {
                strategy: ExtractionStrategy::Ocr,
                ..
            }
        ));

        // 带上已尝试策略后改用 hybrid
        let out = worker(true)
            .run(
                StepAction::Extract,
                &json!({"method": "multi_method", "tried_strategies": ["ocr"]}),
                &ctx,
            )
            .await
            .unwrap();
        let result: ExtractionResult = serde_json::from_value(out.data).unwrap();
        assert_eq!(result.strategy, ExtractionStrategy::Hybrid);
        assert_eq!(
            result.tried_strategies,
            vec![ExtractionStrategy::Ocr, ExtractionStrategy::Hybrid]
        );
    }

    #[tokio::test]
    async fn test_exhausted_and_unsupported() {
        let ctx = TaskContext::new(Arc::new(invoice(DocumentInfo::default())));
        let err = worker(true)
            .run(
                StepAction::Extract,
                &json!({"tried_strategies": ["text", "hybrid", "ocr"]}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::StrategiesExhausted(_)));

        let err = worker(true)
            .run(StepAction::Route, &json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnsupportedAction { .. }));
    }
}
