//! 消息模板提供者

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{MessageProvider, ProviderError};
use crate::workers::{MessageKind, RouteAction};

/// 起草通知所需的信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub kind: MessageKind,
    pub invoice_number: String,
    pub vendor_name: String,
    pub amount: f64,
    pub currency: String,
    pub route: RouteAction,
    pub issues: Vec<String>,
    pub due_date: Option<String>,
}

/// 结构化模板：审批请求 / 供应商询问
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateMessageProvider;

impl TemplateMessageProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageProvider for TemplateMessageProvider {
    fn name(&self) -> &str {
        "template"
    }

    async fn compose(&self, request: &MessageRequest) -> Result<String, ProviderError> {
        let mut body = String::new();
        match request.kind {
            MessageKind::ApprovalRequest => {
                body.push_str(&format!(
                    "Hello,\n\nInvoice {} from {} for {:.2} {} is waiting for {}.\n",
                    request.invoice_number,
                    request.vendor_name,
                    request.amount,
                    request.currency,
                    request.route.as_str().replace('_', " ")
                ));
                if let Some(due) = &request.due_date {
                    body.push_str(&format!("Payment is due on {due}.\n"));
                }
            }
            MessageKind::VendorQuery => {
                body.push_str(&format!(
                    "Dear {},\n\nWe could not complete processing of invoice {} ({:.2} {}).\n",
                    request.vendor_name, request.invoice_number, request.amount, request.currency
                ));
            }
        }
        if !request.issues.is_empty() {
            body.push_str("\nPoints to clarify:\n");
            for issue in &request.issues {
                body.push_str(&format!("- {issue}\n"));
            }
        }
        body.push_str("\nThank you,\nAccounts Payable");
        Ok(body)
    }
}
