//! apflow - 发票处理编排
//!
//! 入口：加载配置、初始化日志、用 JSON 文件填充内存存储，经轮询器处理全部待处理发票，
//! 每个结果输出一行 JSON。Ctrl+C 取消。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use apflow::batch::{run_poller, PollMode};
use apflow::config::{load_config, AppConfig};
use apflow::observability;
use apflow::storage::InMemorySubjectStore;
use apflow::OrchestratorBuilder;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(None).unwrap_or_else(|e| {
        eprintln!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    observability::init(&cfg.logging);

    let data_file = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| cfg.app.data_file.clone())
        .context("Usage: apflow <invoices.json> (or set app.data_file)")?;

    let store = Arc::new(
        InMemorySubjectStore::from_json_file(&data_file)
            .await
            .with_context(|| format!("Failed to load invoices from {}", data_file.display()))?,
    );
    let orchestrator = Arc::new(
        OrchestratorBuilder::new(cfg.clone())
            .with_store(store)
            .build()
            .await
            .context("Failed to build orchestrator")?,
    );

    // 事件日志
    let mut events = orchestrator.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    event = event.kind(),
                    subject_id = event.subject_id().unwrap_or("-"),
                    "Orchestrator event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event log lagged, {} events skipped", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, cancelling");
            ctrl_c.cancel();
        }
    });

    let stats = run_poller(
        orchestrator.clone(),
        &cfg.poller,
        PollMode::Drain,
        cancel,
        |result| match serde_json::to_string(result) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to serialize result: {}", e),
        },
    )
    .await
    .context("Poller failed")?;

    orchestrator.flush_background().await;
    let learning = orchestrator.learning().stats().await;
    tracing::info!(
        processed = stats.processed,
        failed = stats.failed,
        experiences = learning.experiences,
        insights = learning.insights,
        "Done"
    );
    event_log.abort();
    Ok(())
}
