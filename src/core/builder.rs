//! 编排器构建器：统一的组件初始化逻辑
//!
//! 按配置组装规则引擎、学习存储、能力提供者与各 Worker；未显式注入的组件使用默认实现。
//! 注册表默认做完整性检查，`with_registry` 注入的注册表按原样使用（测试缺失 Worker 的场景）。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::error::OrchestratorError;
use crate::core::events::EventBus;
use crate::core::executor::StepExecutor;
use crate::core::orchestrator::{Orchestrator, OrchestratorParts, OrchestratorSettings};
use crate::learning::AdaptiveLearningStore;
use crate::providers::{
    DeclaredFieldsProvider, ExtractionProvider, MessageProvider, TemplateMessageProvider,
};
use crate::rules::BusinessRuleEngine;
use crate::storage::SubjectStore;
use crate::workers::{
    CommunicationWorker, CoordinatorWorker, ExtractorWorker, NoFlavor, ReasoningFlavor,
    RouterWorker, SimulatedFlavor, ValidatorWorker, Worker, WorkerRegistry,
};

pub struct OrchestratorBuilder {
    config: AppConfig,
    rules: Option<Arc<BusinessRuleEngine>>,
    learning: Option<Arc<AdaptiveLearningStore>>,
    store: Option<Arc<dyn SubjectStore>>,
    events: Option<EventBus>,
    extraction_provider: Option<Option<Arc<dyn ExtractionProvider>>>,
    message_provider: Option<Option<Arc<dyn MessageProvider>>>,
    flavor: Option<Arc<dyn ReasoningFlavor>>,
    workers: Vec<Arc<dyn Worker>>,
    registry: Option<WorkerRegistry>,
    step_timeout: Option<Duration>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            rules: None,
            learning: None,
            store: None,
            events: None,
            extraction_provider: None,
            message_provider: None,
            flavor: None,
            workers: Vec::new(),
            registry: None,
            step_timeout: None,
        }
    }

    pub fn with_rule_engine(mut self, rules: Arc<BusinessRuleEngine>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_learning_store(mut self, learning: Arc<AdaptiveLearningStore>) -> Self {
        self.learning = Some(learning);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SubjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 共享事件通道；不设置时按配置容量新建
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// None 表示不使用提供者（抽取退回模板读取）
    pub fn with_extraction_provider(mut self, provider: Option<Arc<dyn ExtractionProvider>>) -> Self {
        self.extraction_provider = Some(provider);
        self
    }

    pub fn with_message_provider(mut self, provider: Option<Arc<dyn MessageProvider>>) -> Self {
        self.message_provider = Some(provider);
        self
    }

    pub fn with_flavor(mut self, flavor: Arc<dyn ReasoningFlavor>) -> Self {
        self.flavor = Some(flavor);
        self
    }

    /// 替换某个角色的默认 Worker
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.workers.push(worker);
        self
    }

    /// 直接使用给定注册表，不做完整性检查
    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    async fn build_rule_engine(&self) -> Result<Arc<BusinessRuleEngine>, OrchestratorError> {
        if let Some(rules) = &self.rules {
            return Ok(rules.clone());
        }
        let engine = if self.config.rules.load_defaults {
            BusinessRuleEngine::with_defaults()
        } else {
            BusinessRuleEngine::new()
        };
        if let Some(path) = &self.config.rules.seed_file {
            let count = engine.load_toml(path).await?;
            tracing::info!(path = %path.display(), count, "Seed rules loaded");
        }
        Ok(Arc::new(engine))
    }

    pub async fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let rules = self.build_rule_engine().await?;
        let learning = self
            .learning
            .clone()
            .unwrap_or_else(|| Arc::new(AdaptiveLearningStore::new(self.config.learning.clone())));
        let flavor: Arc<dyn ReasoningFlavor> = match &self.flavor {
            Some(f) => f.clone(),
            None if self.config.orchestrator.simulated_flavor => Arc::new(SimulatedFlavor::default()),
            None => Arc::new(NoFlavor),
        };

        let providers = &self.config.providers;
        let extraction_provider = match self.extraction_provider.clone() {
            Some(p) => p,
            None if providers.extraction_enabled => {
                Some(Arc::new(DeclaredFieldsProvider::new()) as Arc<dyn ExtractionProvider>)
            }
            None => None,
        };
        let message_provider = match self.message_provider.clone() {
            Some(p) => p,
            None if providers.communication_enabled => {
                Some(Arc::new(TemplateMessageProvider::new()) as Arc<dyn MessageProvider>)
            }
            None => None,
        };

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let mut builder = WorkerRegistry::builder()
                    .register(Arc::new(ExtractorWorker::new(extraction_provider, flavor.clone())))
                    .register(Arc::new(ValidatorWorker::new(flavor.clone())))
                    .register(Arc::new(RouterWorker::new(
                        rules.clone(),
                        Some(learning.clone()),
                        flavor.clone(),
                    )));
                for worker in self.workers {
                    builder = builder.register(worker);
                }
                builder.build()?
            }
        };

        let orchestrator = &self.config.orchestrator;
        let step_timeout = self
            .step_timeout
            .unwrap_or_else(|| Duration::from_secs(orchestrator.step_timeout_secs));
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(orchestrator.event_capacity));

        tracing::info!(
            workers = ?registry.roles(),
            step_timeout_ms = step_timeout.as_millis() as u64,
            "Orchestrator built"
        );

        Ok(Orchestrator::from_parts(OrchestratorParts {
            planner: CoordinatorWorker::new(flavor),
            executor: StepExecutor::new(registry, step_timeout),
            communicator: Arc::new(CommunicationWorker::new(message_provider)),
            rules,
            learning,
            store: self.store,
            events,
            settings: OrchestratorSettings {
                max_recovery_attempts: orchestrator.max_recovery_attempts,
                learning_feedback: orchestrator.learning_feedback,
                communication: orchestrator.communication,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerRole;
    use std::io::Write;

    #[tokio::test]
    async fn test_default_build() {
        let orch = OrchestratorBuilder::new(AppConfig::default()).build().await.unwrap();
        assert_eq!(orch.rules().len().await, 6);
        assert_eq!(orch.worker_states().await.len(), WorkerRole::ALL.len());
        assert!(orch.store().is_none());
    }

    #[tokio::test]
    async fn test_seed_file_without_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"[[rules]]
name = "Big spend"
actions = ["executive_approval"]
[rules.conditions]
min_amount = 50000.0
"#
        )
        .unwrap();
        let mut config = AppConfig::default();
        config.rules.load_defaults = false;
        config.rules.seed_file = Some(file.path().to_path_buf());
        let orch = OrchestratorBuilder::new(config).build().await.unwrap();
        let rules = orch.rules().list_active().await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "Big spend");
    }

    #[tokio::test]
    async fn test_incomplete_custom_registry_is_used_as_is() {
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_registry(WorkerRegistry::builder().build_unchecked())
            .build()
            .await;
        assert!(orch.is_ok());
    }
}
