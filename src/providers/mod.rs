//! 能力提供者抽象
//!
//! 文档抽取与消息生成都是可插拔能力：Worker 只依赖 trait，提供者缺失或失败时
//! 由 Worker 降级为模板结果（更低置信度）。

pub mod extraction;
pub mod message;

use async_trait::async_trait;
use thiserror::Error;

use crate::invoice::Invoice;
use crate::workers::{ExtractedFields, ExtractionStrategy};

pub use extraction::DeclaredFieldsProvider;
pub use message::{MessageRequest, TemplateMessageProvider};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Strategy {0} not supported for this document: {1}")]
    Unsupported(ExtractionStrategy, String),

    #[error("Provider failed: {0}")]
    Failed(String),
}

/// 文档抽取提供者
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        invoice: &Invoice,
        strategy: ExtractionStrategy,
    ) -> Result<ExtractedFields, ProviderError>;
}

/// 消息生成提供者：返回正文
#[async_trait]
pub trait MessageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn compose(&self, request: &MessageRequest) -> Result<String, ProviderError>;
}
