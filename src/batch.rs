//! 批量轮询（调用方一侧的背压）
//!
//! 每隔 interval_secs 从存储取至多 batch_size 张待处理发票，逐张处理、张与张之间间隔 item_delay_ms。
//! Drain 模式下没有待处理发票即退出；Continuous 模式直到取消令牌触发。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::PollerSection;
use crate::core::{Orchestrator, OrchestratorError, ProcessingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    Continuous,
    Drain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub polls: u64,
    pub processed: u64,
    /// 存储层失败（读取或终态写回）
    pub failed: u64,
}

/// 运行轮询循环；使用编排器配置的存储，未配置存储时返回 Config 错误
pub async fn run_poller<F>(
    orchestrator: Arc<Orchestrator>,
    settings: &PollerSection,
    mode: PollMode,
    cancel: CancellationToken,
    mut on_result: F,
) -> Result<PollerStats, OrchestratorError>
where
    F: FnMut(&ProcessingResult),
{
    let store = orchestrator
        .store()
        .cloned()
        .ok_or_else(|| OrchestratorError::Config("poller requires a subject store".to_string()))?;
    let interval = Duration::from_secs(settings.interval_secs);
    let item_delay = Duration::from_millis(settings.item_delay_ms);
    let mut stats = PollerStats::default();
    // 同一轮运行内每张发票只尝试一次，避免写回失败的发票被反复拉取
    let mut attempted: HashSet<String> = HashSet::new();

    while !cancel.is_cancelled() {
        stats.polls += 1;
        let batch: Vec<_> = store
            .pending(settings.batch_size.max(1) + attempted.len())
            .await?
            .into_iter()
            .filter(|inv| !attempted.contains(&inv.id))
            .take(settings.batch_size.max(1))
            .collect();
        tracing::debug!(poll = stats.polls, count = batch.len(), "Poll");

        if batch.is_empty() {
            if mode == PollMode::Drain {
                break;
            }
        } else {
            for (i, invoice) in batch.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                if i > 0 && !item_delay.is_zero() && !sleep_or_cancel(item_delay, &cancel).await {
                    break;
                }
                attempted.insert(invoice.id.clone());
                match orchestrator
                    .process_stored_with_cancel(&invoice.id, cancel.child_token())
                    .await
                {
                    Ok(result) => {
                        stats.processed += 1;
                        on_result(&result);
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::warn!(subject_id = %invoice.id, "Stored processing failed: {}", e);
                    }
                }
            }
            if mode == PollMode::Drain {
                continue;
            }
        }

        if !sleep_or_cancel(interval, &cancel).await {
            break;
        }
    }

    tracing::info!(
        polls = stats.polls,
        processed = stats.processed,
        failed = stats.failed,
        "Poller stopped"
    );
    Ok(stats)
}

/// 睡眠；被取消时返回 false
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
