//! apflow - Rust 发票处理编排核心
//!
//! 模块划分：
//! - **batch**: 调用方一侧的批量轮询（批大小、间隔、取消）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 计划、步骤执行、恢复、事件、Worker 状态与主控编排器
//! - **invoice**: 发票、供应商与文档声明等领域类型
//! - **learning**: 自适应学习存储（经验日志、模式洞察、适配建议、路由预测）
//! - **observability**: tracing 日志初始化
//! - **providers**: 文档抽取与消息生成能力提供者
//! - **rules**: 业务规则、自然语言规则解析与规则引擎
//! - **storage**: 持久化契约与内存实现
//! - **workers**: Coordinator / Extractor / Validator / Router / Communicator

pub mod batch;
pub mod config;
pub mod core;
pub mod invoice;
pub mod learning;
pub mod observability;
pub mod providers;
pub mod rules;
pub mod storage;
pub mod workers;

pub use crate::core::{Orchestrator, OrchestratorBuilder, OrchestratorError, ProcessingResult};
