//! 声明字段抽取：直接读取发票记录上的声明字段
//!
//! 不做真正的 OCR；按文档类型与质量模拟各策略的可用性。

use async_trait::async_trait;

use super::{ExtractionProvider, ProviderError};
use crate::invoice::{DocumentQuality, DocumentType, Invoice};
use crate::workers::{ExtractedFields, ExtractionStrategy};

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredFieldsProvider;

impl DeclaredFieldsProvider {
    pub fn new() -> Self {
        Self
    }

    fn check_supported(invoice: &Invoice, strategy: ExtractionStrategy) -> Result<(), ProviderError> {
        let doc = &invoice.document;
        let reason = match strategy {
            ExtractionStrategy::Text if doc.doc_type == DocumentType::Scanned => {
                Some("no text layer")
            }
            ExtractionStrategy::Template if !doc.template_known => Some("no known vendor template"),
            ExtractionStrategy::Ocr if doc.quality == DocumentQuality::Low => {
                Some("image quality too low for ocr")
            }
            _ => None,
        };
        match reason {
            Some(r) => Err(ProviderError::Unsupported(strategy, r.to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ExtractionProvider for DeclaredFieldsProvider {
    fn name(&self) -> &str {
        "declared_fields"
    }

    async fn extract(
        &self,
        invoice: &Invoice,
        strategy: ExtractionStrategy,
    ) -> Result<ExtractedFields, ProviderError> {
        Self::check_supported(invoice, strategy)?;
        let mut fields = ExtractedFields::from_invoice(invoice);
        // 混合策略对低质量文档仍读不出行项目
        if strategy == ExtractionStrategy::Hybrid && invoice.document.quality == DocumentQuality::Low {
            fields.line_items.clear();
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::{DocumentInfo, LineItem, TrustLevel, Vendor};

    fn invoice(doc: DocumentInfo) -> Invoice {
        Invoice::new("inv-1", "N-1", Vendor::new("v1", "Acme", TrustLevel::High), 100.0)
            .with_line_items(vec![LineItem::new("Widget", 2.0, 50.0)])
            .with_document(doc)
    }

    #[tokio::test]
    async fn test_text_on_scanned_fails() {
        let provider = DeclaredFieldsProvider::new();
        let inv = invoice(DocumentInfo {
            doc_type: DocumentType::Scanned,
            ..Default::default()
        });
        let err = provider.extract(&inv, ExtractionStrategy::Text).await.unwrap_err();
        assert!(err.to_string().contains("no text layer"));
        assert!(provider.extract(&inv, ExtractionStrategy::Ocr).await.is_ok());
    }

    #[tokio::test]
    async fn test_template_requires_known_template() {
        let provider = DeclaredFieldsProvider::new();
        let unknown = invoice(DocumentInfo::default());
        assert!(provider.extract(&unknown, ExtractionStrategy::Template).await.is_err());
        let known = invoice(DocumentInfo {
            template_known: true,
            ..Default::default()
        });
        let fields = provider.extract(&known, ExtractionStrategy::Template).await.unwrap();
        assert_eq!(fields.invoice_number.as_deref(), Some("N-1"));
        assert_eq!(fields.line_items.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_on_low_quality_drops_line_items() {
        let provider = DeclaredFieldsProvider::new();
        let inv = invoice(DocumentInfo {
            quality: DocumentQuality::Low,
            ..Default::default()
        });
        assert!(provider.extract(&inv, ExtractionStrategy::Ocr).await.is_err());
        let fields = provider.extract(&inv, ExtractionStrategy::Hybrid).await.unwrap();
        assert!(fields.line_items.is_empty());
        assert_eq!(fields.amount, Some(100.0));
    }
}
