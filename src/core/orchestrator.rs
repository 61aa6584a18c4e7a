//! 发票编排器：主控循环
//!
//! 负责：调用 Coordinator 生成计划、按顺序执行 Extract / Validate / Route 三步、
//! 失败时走 RecoveryEngine、汇总 ProcessingResult，并在成功后把学习反馈与通知起草放到后台任务。
//! 计划级失败不向调用方返回错误，而是返回降级结果（人工复核）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::core::context::TaskContext;
use crate::core::error::OrchestratorError;
use crate::core::events::{EventBus, OrchestratorEvent};
use crate::core::executor::StepExecutor;
use crate::core::plan::{Plan, PlanId, PlanStatus, Step, StepAction, StepOutput};
use crate::core::recovery::{RecoveryAction, RecoveryEngine};
use crate::core::result::{InsightSummary, ProcessingResult};
use crate::core::state::{WorkerState, WorkerStateBoard, WorkerStatus};
use crate::invoice::Invoice;
use crate::learning::{
    amount_range_key, vendor_key, AdaptiveLearningStore, ExperienceContext, ExperienceOutcome,
    ExperienceType, LearningExperience, RecommendedAction, Recommendation,
};
use crate::rules::BusinessRuleEngine;
use crate::storage::{ActivityRecord, StatusUpdate, SubjectStore};
use crate::workers::{CommunicationWorker, CoordinatorWorker, WorkerRole};

/// 编排器运行参数（来自 [orchestrator] 配置段）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_recovery_attempts: u32,
    pub learning_feedback: bool,
    pub communication: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 1,
            learning_feedback: true,
            communication: true,
        }
    }
}

/// 构建器组装好的各组件
pub(crate) struct OrchestratorParts {
    pub planner: CoordinatorWorker,
    pub executor: StepExecutor,
    pub communicator: Arc<CommunicationWorker>,
    pub rules: Arc<BusinessRuleEngine>,
    pub learning: Arc<AdaptiveLearningStore>,
    pub store: Option<Arc<dyn SubjectStore>>,
    pub events: EventBus,
    pub settings: OrchestratorSettings,
}

pub struct Orchestrator {
    planner: CoordinatorWorker,
    executor: StepExecutor,
    communicator: Arc<CommunicationWorker>,
    recovery: RecoveryEngine,
    rules: Arc<BusinessRuleEngine>,
    learning: Arc<AdaptiveLearningStore>,
    store: Option<Arc<dyn SubjectStore>>,
    events: EventBus,
    states: WorkerStateBoard,
    /// 执行中的计划快照，计划结束即移除
    active_plans: RwLock<HashMap<PlanId, Plan>>,
    background: Mutex<JoinSet<()>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub(crate) fn from_parts(parts: OrchestratorParts) -> Self {
        Self {
            planner: parts.planner,
            executor: parts.executor,
            communicator: parts.communicator,
            recovery: RecoveryEngine::new(),
            rules: parts.rules,
            learning: parts.learning,
            store: parts.store,
            events: parts.events,
            states: WorkerStateBoard::new(WorkerRole::ALL),
            active_plans: RwLock::new(HashMap::new()),
            background: Mutex::new(JoinSet::new()),
            settings: parts.settings,
        }
    }

    pub fn rules(&self) -> &Arc<BusinessRuleEngine> {
        &self.rules
    }

    pub fn learning(&self) -> &Arc<AdaptiveLearningStore> {
        &self.learning
    }

    pub fn store(&self) -> Option<&Arc<dyn SubjectStore>> {
        self.store.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// 当前执行中的计划
    pub async fn active_plans(&self) -> Vec<Plan> {
        self.active_plans.read().await.values().cloned().collect()
    }

    pub async fn plan(&self, plan_id: &str) -> Option<Plan> {
        self.active_plans.read().await.get(plan_id).cloned()
    }

    pub async fn plan_status(&self, plan_id: &str) -> Option<PlanStatus> {
        self.active_plans.read().await.get(plan_id).map(|p| p.status)
    }

    pub async fn worker_states(&self) -> Vec<WorkerState> {
        self.states.snapshot().await
    }

    pub async fn reset_worker(&self, role: WorkerRole) {
        self.states.reset(role).await;
    }

    /// 等待所有后台任务（学习反馈、通知起草）结束
    pub async fn flush_background(&self) {
        let mut set = std::mem::take(&mut *self.background.lock().await);
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                tracing::warn!("Background task failed: {}", e);
            }
        }
    }

    pub async fn process(&self, invoice: Invoice) -> ProcessingResult {
        self.process_with_cancel(invoice, CancellationToken::new()).await
    }

    /// 处理一张发票；取消令牌触发时中止当前步骤的等待并返回降级结果
    #[instrument(skip(self, invoice, cancel), fields(subject_id = %invoice.id))]
    pub async fn process_with_cancel(
        &self,
        invoice: Invoice,
        cancel: CancellationToken,
    ) -> ProcessingResult {
        let start = Instant::now();
        let invoice = Arc::new(invoice);
        let mut ctx = TaskContext::new(invoice.clone());

        self.events.emit(OrchestratorEvent::ProcessingStarted {
            subject_id: ctx.subject_id.clone(),
            session_id: ctx.session_id.clone(),
        });
        tracing::info!(session_id = %ctx.session_id, amount = invoice.amount, "Processing started");

        if cancel.is_cancelled() {
            return self.fail(None, &ctx, OrchestratorError::Cancelled, start).await;
        }

        self.states
            .begin(WorkerRole::Coordinator, WorkerStatus::Thinking, &format!("plan {}", ctx.subject_id))
            .await;
        let mut plan = self.planner.plan(&invoice, &ctx).await;
        self.states.finish(WorkerRole::Coordinator, plan.confidence).await;

        plan.mark_executing();
        self.publish(&plan).await;
        self.events.emit(OrchestratorEvent::PlanCreated {
            plan_id: plan.id.clone(),
            subject_id: ctx.subject_id.clone(),
            complexity: plan.complexity,
            confidence: plan.confidence,
            steps: plan.actions(),
        });
        tracing::info!(
            plan_id = %plan.id,
            complexity = plan.complexity.as_str(),
            confidence = plan.confidence,
            "Plan created"
        );

        match self.run_steps(&mut plan, &mut ctx, &cancel).await {
            Ok(()) => {
                plan.mark_completed();
                self.publish(&plan).await;
                let insights = self.build_insights(&invoice, &ctx).await;
                let result = ProcessingResult::compile(&ctx, &plan.id, insights, elapsed_ms(start));
                self.events.emit(OrchestratorEvent::ProcessingCompleted {
                    subject_id: ctx.subject_id.clone(),
                    plan_id: plan.id.clone(),
                    result: Box::new(result.clone()),
                });
                tracing::info!(
                    plan_id = %plan.id,
                    route = result.workflow.route.as_str(),
                    confidence = result.confidence,
                    ms = result.processing_time_ms,
                    "Processing completed"
                );
                self.spawn_follow_ups(&invoice, &plan, &result).await;
                self.active_plans.write().await.remove(&plan.id);
                result
            }
            Err(err) => {
                plan.mark_failed();
                self.publish(&plan).await;
                let result = self.fail(Some(plan.id.clone()), &ctx, err, start).await;
                self.active_plans.write().await.remove(&plan.id);
                result
            }
        }
    }

    /// 读取存储中的发票并处理，最后写回终态
    pub async fn process_stored(&self, id: &str) -> Result<ProcessingResult, OrchestratorError> {
        self.process_stored_with_cancel(id, CancellationToken::new()).await
    }

    pub async fn process_stored_with_cancel(
        &self,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<ProcessingResult, OrchestratorError> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| OrchestratorError::Config("no subject store configured".to_string()))?;
        let invoice = store.get_invoice(id).await?;
        if let Err(e) = store.update_invoice_status(id, StatusUpdate::processing()).await {
            tracing::warn!(subject_id = %id, "Failed to mark invoice processing: {}", e);
        }
        let result = self.process_with_cancel(invoice, cancel).await;
        store
            .update_invoice_status(id, StatusUpdate::from_result(&result))
            .await?;
        Ok(result)
    }

    async fn run_steps(
        &self,
        plan: &mut Plan,
        ctx: &mut TaskContext,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        for index in 0..plan.steps().len() {
            self.run_step(plan, index, ctx, cancel).await?;
        }
        Ok(())
    }

    /// 执行单步；失败时按恢复动作重试或合成占位结果，直至成功、不可恢复或次数用尽
    async fn run_step(
        &self,
        plan: &mut Plan,
        index: usize,
        ctx: &mut TaskContext,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let mut recoveries = 0u32;
        loop {
            let (action, input) = self.start_attempt(plan, index, ctx).await?;
            let role = action.role();

            let err = match self.executor.execute(action, &input, ctx, cancel).await {
                Ok(output) => {
                    let output = if recoveries > 0 { output.mark_recovered() } else { output };
                    return self.complete_step(plan, index, ctx, output).await;
                }
                Err(err) => err,
            };

            let (step_id, step) = {
                let step = step_at(plan, index)?;
                step.fail()?;
                (step.id.clone(), step.clone())
            };
            self.publish(plan).await;
            let reason = err.reason();
            let recoverable = err.is_recoverable();
            self.events.emit(OrchestratorEvent::StepFailed {
                plan_id: plan.id.clone(),
                step_id,
                action,
                error: reason.clone(),
                recoverable,
            });
            self.states.fail(role, &reason).await;
            self.log_activity(
                ActivityRecord::new(Some(&plan.id), &ctx.subject_id, action.as_str(), role.as_str(), "failed")
                    .with_message(reason.clone()),
            )
            .await;
            tracing::warn!(plan_id = %plan.id, step = action.as_str(), recoverable, "Step failed: {}", reason);

            if !recoverable {
                return Err(err);
            }
            if recoveries >= self.settings.max_recovery_attempts {
                return Err(OrchestratorError::RecoveryExhausted {
                    action,
                    reason: format!("recovery fallback failed after {recoveries} attempt(s): {reason}"),
                });
            }
            recoveries += 1;

            match self.recovery.plan_recovery(&step, &err, ctx) {
                RecoveryAction::Abort(reason) => {
                    return Err(OrchestratorError::RecoveryExhausted { action, reason });
                }
                RecoveryAction::Placeholder => {
                    let output = self.recovery.placeholder(action, &reason)?;
                    self.start_attempt(plan, index, ctx).await?;
                    return self.complete_step(plan, index, ctx, output).await;
                }
                retry => {
                    let input = self.recovery.retry_input(&step, &retry);
                    step_at(plan, index)?.set_input(input);
                    self.states.waiting(role, &format!("recovery: {retry:?}")).await;
                    tracing::info!(plan_id = %plan.id, step = action.as_str(), attempt = recoveries, "Retrying step: {:?}", retry);
                }
            }
        }
    }

    /// Pending/Failed -> Running，发出 StepStarted
    async fn start_attempt(
        &self,
        plan: &mut Plan,
        index: usize,
        ctx: &TaskContext,
    ) -> Result<(StepAction, serde_json::Value), OrchestratorError> {
        let (step_id, action, input, attempt) = {
            let step = step_at(plan, index)?;
            let attempt = step.begin_attempt()?;
            (step.id.clone(), step.action, step.input.clone(), attempt)
        };
        self.publish(plan).await;
        let role = action.role();
        self.events.emit(OrchestratorEvent::StepStarted {
            plan_id: plan.id.clone(),
            step_id,
            action,
            worker: role,
            attempt,
        });
        self.states
            .begin(role, WorkerStatus::Working, &format!("{} {}", action.as_str(), ctx.subject_id))
            .await;
        self.log_activity(ActivityRecord::new(
            Some(&plan.id),
            &ctx.subject_id,
            action.as_str(),
            role.as_str(),
            "started",
        ))
        .await;
        Ok((action, input))
    }

    async fn complete_step(
        &self,
        plan: &mut Plan,
        index: usize,
        ctx: &mut TaskContext,
        output: StepOutput,
    ) -> Result<(), OrchestratorError> {
        let (step_id, action) = {
            let step = step_at(plan, index)?;
            step.complete(output.clone())?;
            (step.id.clone(), step.action)
        };
        self.publish(plan).await;
        let role = action.role();
        let (confidence, recovered) = (output.confidence, output.recovered);
        ctx.record(role, output);
        self.events.emit(OrchestratorEvent::StepCompleted {
            plan_id: plan.id.clone(),
            step_id,
            action,
            confidence,
            recovered,
        });
        self.states.finish(role, confidence).await;
        self.log_activity(
            ActivityRecord::new(
                Some(&plan.id),
                &ctx.subject_id,
                action.as_str(),
                role.as_str(),
                if recovered { "recovered" } else { "completed" },
            )
            .with_confidence(confidence),
        )
        .await;
        Ok(())
    }

    /// 终止路径：发出 ProcessingError 并返回降级结果
    async fn fail(
        &self,
        plan_id: Option<PlanId>,
        ctx: &TaskContext,
        err: OrchestratorError,
        start: Instant,
    ) -> ProcessingResult {
        let reason = err.reason();
        let result = ProcessingResult::degraded(
            ctx.subject_id.clone(),
            plan_id.clone(),
            ctx.session_id.clone(),
            &reason,
            elapsed_ms(start),
        );
        tracing::error!(plan_id = ?plan_id, "Processing failed: {}", reason);
        self.log_activity(
            ActivityRecord::new(plan_id.as_deref(), &ctx.subject_id, "plan", WorkerRole::Coordinator.as_str(), "failed")
                .with_confidence(result.confidence)
                .with_message(reason.clone()),
        )
        .await;
        self.events.emit(OrchestratorEvent::ProcessingError {
            subject_id: ctx.subject_id.clone(),
            plan_id,
            error: reason,
            result: Box::new(result.clone()),
        });
        result
    }

    async fn publish(&self, plan: &Plan) {
        self.active_plans
            .write()
            .await
            .insert(plan.id.clone(), plan.clone());
    }

    /// 活动记录写入失败只记日志
    async fn log_activity(&self, record: ActivityRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_step_activity(record).await {
                tracing::warn!("Failed to save step activity: {}", e);
            }
        }
    }

    async fn build_insights(&self, invoice: &Invoice, ctx: &TaskContext) -> InsightSummary {
        let mut patterns = Vec::new();
        for key in [vendor_key(&invoice.vendor.id), amount_range_key(invoice.amount_range())] {
            if let Some(insight) = self.learning.insight(&key).await {
                patterns.push(format!(
                    "{}: {} observations, confidence {:.2}",
                    insight.pattern, insight.frequency, insight.confidence
                ));
            }
        }
        let recommendations = self
            .learning
            .generate_adaptations()
            .await
            .iter()
            .take(3)
            .map(describe_recommendation)
            .collect();
        let learnings = ctx
            .recovered_roles()
            .into_iter()
            .map(|role| format!("{} recovered after failure", role.as_str()))
            .collect();
        InsightSummary {
            patterns,
            recommendations,
            learnings,
        }
    }

    /// 学习反馈与通知起草：后台执行，不阻塞调用方
    async fn spawn_follow_ups(&self, invoice: &Arc<Invoice>, plan: &Plan, result: &ProcessingResult) {
        let mut background = self.background.lock().await;
        while background.try_join_next().is_some() {}

        if self.settings.learning_feedback {
            let learning = self.learning.clone();
            let invoice = invoice.clone();
            let workflow = plan.complexity.as_str().to_string();
            let plan_confidence = plan.confidence;
            let result = result.clone();
            background.spawn(async move {
                let efficiency = LearningExperience::new(
                    ExperienceType::ProcessingEfficiency,
                    ExperienceContext {
                        vendor_id: Some(invoice.vendor.id.clone()),
                        amount: Some(invoice.amount),
                        workflow: Some(workflow),
                        ..Default::default()
                    },
                    ExperienceOutcome {
                        success: true,
                        effectiveness: result.confidence,
                        processing_time_ms: Some(result.processing_time_ms),
                        note: None,
                    },
                    plan_confidence,
                );
                learning.record_experience(efficiency).await;

                let accuracy = LearningExperience::new(
                    ExperienceType::ValidationAccuracy,
                    ExperienceContext {
                        vendor_id: Some(invoice.vendor.id.clone()),
                        document_type: Some(invoice.document.doc_type),
                        ..Default::default()
                    },
                    ExperienceOutcome {
                        success: result.validation.is_valid,
                        effectiveness: result.validation.confidence,
                        processing_time_ms: None,
                        note: None,
                    },
                    result.validation.confidence,
                );
                learning.record_experience(accuracy).await;
            });
        }

        if self.settings.communication && CommunicationWorker::should_notify(result) {
            let communicator = self.communicator.clone();
            let states = self.states.clone();
            let store = self.store.clone();
            let invoice = invoice.clone();
            let plan_id = plan.id.clone();
            let result = result.clone();
            background.spawn(async move {
                let role = communicator.role();
                states
                    .begin(role, WorkerStatus::Working, &format!("draft {}", invoice.id))
                    .await;
                let draft = communicator.draft(&invoice, &result).await;
                states.finish(role, draft.confidence).await;
                tracing::info!(
                    subject_id = %invoice.id,
                    recipient = %draft.recipient,
                    provider = %draft.provider,
                    "Notification drafted"
                );
                if let Some(store) = store {
                    let record = ActivityRecord::new(
                        Some(&plan_id),
                        &invoice.id,
                        "communicate",
                        role.as_str(),
                        "drafted",
                    )
                    .with_confidence(draft.confidence)
                    .with_message(format!("{} | {}", draft.recipient, draft.subject));
                    if let Err(e) = store.save_step_activity(record).await {
                        tracing::warn!("Failed to save draft activity: {}", e);
                    }
                }
            });
        }
    }
}

fn step_at(plan: &mut Plan, index: usize) -> Result<&mut Step, OrchestratorError> {
    plan.step_mut(index)
        .ok_or_else(|| OrchestratorError::Planning(format!("step {index} out of range")))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn describe_recommendation(r: &Recommendation) -> String {
    let action = match r.action {
        RecommendedAction::OptimizeWorkflow => "optimize workflow",
        RecommendedAction::ImproveExtraction => "improve extraction",
        RecommendedAction::ReviseRule => "revise rule",
        RecommendedAction::Maintain => "maintain",
        RecommendedAction::Route(route) => route.as_str(),
    };
    format!(
        "{}: {} (expected improvement {:.0}%)",
        r.pattern,
        action,
        r.expected_improvement * 100.0
    )
}
