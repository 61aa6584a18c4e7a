//! 发票领域模型
//!
//! Invoice 是编排核心处理的工作项（Subject）；供应商信任度、文档质量、演示场景标记等
//! 均作为声明属性随发票记录一起由存储层提供。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type InvoiceId = String;

/// 供应商信任等级（有序：Low < Medium < High）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Low => "low",
            TrustLevel::Medium => "medium",
            TrustLevel::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(TrustLevel::Low),
            "medium" => Some(TrustLevel::Medium),
            "high" => Some(TrustLevel::High),
            _ => None,
        }
    }
}

/// 供应商状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorStatus {
    /// 首次合作
    New,
    Established,
    /// 已暂停合作
    Suspended,
}

impl VendorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorStatus::New => "new",
            VendorStatus::Established => "established",
            VendorStatus::Suspended => "suspended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: String,
    pub name: String,
    pub trust_level: TrustLevel,
    pub status: VendorStatus,
}

impl Vendor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, trust_level: TrustLevel) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trust_level,
            status: VendorStatus::Established,
        }
    }

    pub fn with_status(mut self, status: VendorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_new(&self) -> bool {
        self.status == VendorStatus::New
    }
}

/// 原始文档类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    #[default]
    Pdf,
    Scanned,
    Email,
    Edi,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Scanned => "scanned",
            DocumentType::Email => "email",
            DocumentType::Edi => "edi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentQuality {
    #[default]
    High,
    Medium,
    Low,
}

/// 文档声明信息：类型、质量、是否有已知供应商模板
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DocumentInfo {
    #[serde(default)]
    pub doc_type: DocumentType,
    #[serde(default)]
    pub quality: DocumentQuality,
    #[serde(default)]
    pub template_known: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: f64, unit_price: f64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            total: quantity * unit_price,
        }
    }
}

/// 演示数据中的预设场景：命中时校验结果由决策表直接给出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    DuplicateSubmission,
    AmountMismatch,
    UnverifiedVendor,
    MissingPurchaseOrder,
    PriceSpike,
}

/// 金额区间（学习存储的组合键维度之一）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmountRange {
    Under1k,
    From1kTo5k,
    From5kTo10k,
    Over10k,
}

impl AmountRange {
    pub fn from_amount(amount: f64) -> Self {
        if amount < 1_000.0 {
            AmountRange::Under1k
        } else if amount < 5_000.0 {
            AmountRange::From1kTo5k
        } else if amount < 10_000.0 {
            AmountRange::From5kTo10k
        } else {
            AmountRange::Over10k
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AmountRange::Under1k => "0-1k",
            AmountRange::From1kTo5k => "1k-5k",
            AmountRange::From5kTo10k => "5k-10k",
            AmountRange::Over10k => "10k+",
        }
    }
}

/// 发票（工作项）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub invoice_number: String,
    pub vendor: Vendor,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub po_number: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    /// 人工或上游系统标记的可疑发票
    #[serde(default)]
    pub flagged: bool,
    #[serde(default)]
    pub scenario: Option<Scenario>,
    #[serde(default)]
    pub document: DocumentInfo,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Invoice {
    pub fn new(
        id: impl Into<String>,
        invoice_number: impl Into<String>,
        vendor: Vendor,
        amount: f64,
    ) -> Self {
        Self {
            id: id.into(),
            invoice_number: invoice_number.into(),
            vendor,
            amount,
            currency: default_currency(),
            invoice_date: None,
            due_date: None,
            po_number: None,
            line_items: Vec::new(),
            flagged: false,
            scenario: None,
            document: DocumentInfo::default(),
        }
    }

    pub fn with_dates(mut self, invoice_date: NaiveDate, due_date: NaiveDate) -> Self {
        self.invoice_date = Some(invoice_date);
        self.due_date = Some(due_date);
        self
    }

    pub fn with_po(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }

    pub fn with_line_items(mut self, items: Vec<LineItem>) -> Self {
        self.line_items = items;
        self
    }

    pub fn with_document(mut self, document: DocumentInfo) -> Self {
        self.document = document;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = Some(scenario);
        self
    }

    pub fn flagged(mut self) -> Self {
        self.flagged = true;
        self
    }

    pub fn amount_range(&self) -> AmountRange {
        AmountRange::from_amount(self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_range_boundaries() {
        assert_eq!(AmountRange::from_amount(999.99), AmountRange::Under1k);
        assert_eq!(AmountRange::from_amount(1_000.0), AmountRange::From1kTo5k);
        assert_eq!(AmountRange::from_amount(5_000.0), AmountRange::From5kTo10k);
        assert_eq!(AmountRange::from_amount(25_000.0), AmountRange::Over10k);
    }

    #[test]
    fn test_trust_level_ordering() {
        assert!(TrustLevel::High > TrustLevel::Medium);
        assert!(TrustLevel::Medium > TrustLevel::Low);
        assert_eq!(TrustLevel::parse(" High "), Some(TrustLevel::High));
        assert_eq!(TrustLevel::parse("unknown"), None);
    }

    #[test]
    fn test_invoice_deserialize_defaults() {
        let raw = r#"{
            "id": "inv-1",
            "invoice_number": "A-100",
            "vendor": {"id": "v1", "name": "Acme", "trust_level": "high", "status": "established"},
            "amount": 300.0
        }"#;
        let invoice: Invoice = serde_json::from_str(raw).unwrap();
        assert_eq!(invoice.currency, "USD");
        assert!(!invoice.flagged);
        assert_eq!(invoice.document.doc_type, DocumentType::Pdf);
        assert!(invoice.scenario.is_none());
    }
}
