//! 内存实现：测试与命令行二进制使用

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ActivityRecord, ProcessingStatus, StatusUpdate, StorageError, SubjectStore};
use crate::invoice::Invoice;

#[derive(Default)]
struct Inner {
    /// 入库顺序
    order: Vec<String>,
    invoices: HashMap<String, Invoice>,
    statuses: HashMap<String, StatusUpdate>,
    activities: Vec<ActivityRecord>,
}

#[derive(Default)]
pub struct InMemorySubjectStore {
    inner: RwLock<Inner>,
}

impl InMemorySubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_invoices(invoices: impl IntoIterator<Item = Invoice>) -> Self {
        let mut inner = Inner::default();
        for invoice in invoices {
            insert_into(&mut inner, invoice);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// 从 JSON 数组文件读取发票
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        let invoices: Vec<Invoice> = serde_json::from_str(&text)?;
        tracing::info!(
            path = %path.as_ref().display(),
            count = invoices.len(),
            "Invoices loaded"
        );
        Ok(Self::with_invoices(invoices))
    }

    /// 插入或替换；状态重置为 Pending
    pub async fn insert(&self, invoice: Invoice) {
        let mut inner = self.inner.write().await;
        insert_into(&mut inner, invoice);
    }

    pub async fn activities(&self) -> Vec<ActivityRecord> {
        self.inner.read().await.activities.clone()
    }

    pub async fn activities_for(&self, subject_id: &str) -> Vec<ActivityRecord> {
        self.inner
            .read()
            .await
            .activities
            .iter()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect()
    }

    pub async fn status(&self, id: &str) -> Option<StatusUpdate> {
        self.inner.read().await.statuses.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn insert_into(inner: &mut Inner, invoice: Invoice) {
    let id = invoice.id.clone();
    if !inner.invoices.contains_key(&id) {
        inner.order.push(id.clone());
    }
    inner.statuses.insert(
        id.clone(),
        StatusUpdate {
            status: ProcessingStatus::Pending,
            route: None,
            confidence: 0.0,
            approval_required: false,
        },
    );
    inner.invoices.insert(id, invoice);
}

#[async_trait]
impl SubjectStore for InMemorySubjectStore {
    async fn get_invoice(&self, id: &str) -> Result<Invoice, StorageError> {
        self.inner
            .read()
            .await
            .invoices
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn save_step_activity(&self, record: ActivityRecord) -> Result<(), StorageError> {
        self.inner.write().await.activities.push(record);
        Ok(())
    }

    async fn update_invoice_status(&self, id: &str, update: StatusUpdate) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if !inner.invoices.contains_key(id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        inner.statuses.insert(id.to_string(), update);
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<Invoice>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .statuses
                    .get(*id)
                    .map(|s| s.status == ProcessingStatus::Pending)
                    .unwrap_or(true)
            })
            .filter_map(|id| inner.invoices.get(id).cloned())
            .take(limit)
            .collect())
    }
}
