//! 步骤执行器
//!
//! 持有 WorkerRegistry 与单步超时；execute 在超时与取消令牌的约束下调用 Worker，
//! 超时 / 失败 / 取消统一转为 OrchestratorError，每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::context::TaskContext;
use crate::core::error::OrchestratorError;
use crate::core::plan::{StepAction, StepOutput};
use crate::workers::WorkerRegistry;

pub struct StepExecutor {
    registry: WorkerRegistry,
    timeout: Duration,
}

impl StepExecutor {
    pub fn new(registry: WorkerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// 执行一步；缺少 Worker 返回 UnknownWorker，输出置信度夹到 [0, 1]
    pub async fn execute(
        &self,
        action: StepAction,
        input: &Value,
        ctx: &TaskContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, OrchestratorError> {
        let role = action.role();
        let worker = self
            .registry
            .get(role)
            .ok_or(OrchestratorError::UnknownWorker(role))?;

        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = timeout(self.timeout, worker.run(action, input, ctx)) => Some(r),
        };

        let outcome = match &result {
            None => "cancelled",
            Some(Ok(Ok(_))) => "ok",
            Some(Ok(Err(_))) => "error",
            Some(Err(_)) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "step_audit",
            "subject_id": ctx.subject_id,
            "session_id": ctx.session_id,
            "worker": worker.name(),
            "step": action.as_str(),
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "input_preview": input_preview(input),
        });
        tracing::info!(audit = %audit.to_string(), "step");

        match result {
            None => Err(OrchestratorError::Cancelled),
            Some(Ok(Ok(mut output))) => {
                output.confidence = crate::core::plan::clamp_confidence(output.confidence);
                Ok(output)
            }
            Some(Ok(Err(source))) => Err(OrchestratorError::WorkerExecution {
                worker: role,
                source,
            }),
            Some(Err(_)) => Err(OrchestratorError::StepTimeout {
                action,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn input_preview(input: &Value) -> String {
    let s = input.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
