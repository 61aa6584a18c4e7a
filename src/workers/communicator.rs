//! 通知起草 Worker（非阻塞）
//!
//! 计划完成后由编排器后台调用；从不失败：提供者缺失、禁用或出错时退回模板消息。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::WorkerRole;
use crate::core::result::ProcessingResult;
use crate::invoice::Invoice;
use crate::providers::{MessageProvider, MessageRequest};

const PROVIDER_CONFIDENCE: f64 = 0.85;
const TEMPLATE_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// 发给审批人
    ApprovalRequest,
    /// 发给供应商澄清问题
    VendorQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftMessage {
    pub kind: MessageKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub confidence: f64,
    pub provider: String,
}

pub struct CommunicationWorker {
    provider: Option<Arc<dyn MessageProvider>>,
}

impl CommunicationWorker {
    pub fn new(provider: Option<Arc<dyn MessageProvider>>) -> Self {
        Self { provider }
    }

    pub fn role(&self) -> WorkerRole {
        WorkerRole::Communicator
    }

    /// 是否需要起草通知：需要审批或存在校验问题
    pub fn should_notify(result: &ProcessingResult) -> bool {
        result.workflow.approval_required || !result.validation.issues.is_empty()
    }

    pub async fn draft(&self, invoice: &Invoice, result: &ProcessingResult) -> DraftMessage {
        let kind = if result.validation.issues.is_empty() {
            MessageKind::ApprovalRequest
        } else {
            MessageKind::VendorQuery
        };
        let request = MessageRequest {
            kind,
            invoice_number: invoice.invoice_number.clone(),
            vendor_name: invoice.vendor.name.clone(),
            amount: invoice.amount,
            currency: invoice.currency.clone(),
            route: result.workflow.route,
            issues: result.validation.issues.clone(),
            due_date: invoice.due_date.map(|d| d.to_string()),
        };
        let (recipient, subject) = match kind {
            MessageKind::ApprovalRequest => (
                format!("approvers:{}", result.workflow.route.as_str()),
                format!("Approval needed: invoice {}", invoice.invoice_number),
            ),
            MessageKind::VendorQuery => (
                format!("vendor:{}", invoice.vendor.id),
                format!("Question about invoice {}", invoice.invoice_number),
            ),
        };

        let composed = match &self.provider {
            Some(p) => match p.compose(&request).await {
                Ok(body) => Some((body, p.name().to_string())),
                Err(e) => {
                    tracing::warn!(provider = p.name(), error = %e, "Message provider failed, using template");
                    None
                }
            },
            None => None,
        };
        let (body, provider, confidence) = match composed {
            Some((body, name)) => (body, name, PROVIDER_CONFIDENCE),
            None => (fallback_body(&request), "fallback".to_string(), TEMPLATE_CONFIDENCE),
        };

        DraftMessage {
            kind,
            recipient,
            subject,
            body,
            confidence,
            provider,
        }
    }
}

fn fallback_body(request: &MessageRequest) -> String {
    let mut body = format!(
        "Invoice {} from {} ({:.2} {}) routed to {}.",
        request.invoice_number,
        request.vendor_name,
        request.amount,
        request.currency,
        request.route.as_str()
    );
    if !request.issues.is_empty() {
        body.push_str(&format!(" Issues: {}.", request.issues.join("; ")));
    }
    body
}
