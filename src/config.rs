//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `APFLOW__*` 覆盖（双下划线表示嵌套，如 `APFLOW__ORCHESTRATOR__STEP_TIMEOUT_SECS=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub orchestrator: OrchestratorSection,
    pub rules: RulesSection,
    pub learning: LearningSection,
    pub poller: PollerSection,
    pub providers: ProvidersSection,
    pub logging: LoggingSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 命令行未给出文件时使用的发票数据（JSON 数组）
    pub data_file: Option<PathBuf>,
}

/// [orchestrator] 段：单步超时、恢复次数、后台反馈开关
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// 每个失败步骤最多执行几次恢复；恢复后的重试再失败即放弃
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    /// 计划完成后是否写入学习经验
    #[serde(default = "default_true")]
    pub learning_feedback: bool,
    /// 计划完成后是否起草通知
    #[serde(default = "default_true")]
    pub communication: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// 启用模拟思考延迟与措辞变化（演示用，测试中保持关闭）
    #[serde(default)]
    pub simulated_flavor: bool,
}

fn default_step_timeout_secs() -> u64 {
    10
}

fn default_max_recovery_attempts() -> u32 {
    1
}

fn default_event_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout_secs(),
            max_recovery_attempts: default_max_recovery_attempts(),
            learning_feedback: true,
            communication: true,
            event_capacity: default_event_capacity(),
            simulated_flavor: false,
        }
    }
}

/// [rules] 段：内置默认规则与种子文件
#[derive(Debug, Clone, Deserialize)]
pub struct RulesSection {
    #[serde(default = "default_true")]
    pub load_defaults: bool,
    pub seed_file: Option<PathBuf>,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            load_defaults: true,
            seed_file: None,
        }
    }
}

/// [learning] 段：经验日志上限与自适应建议阈值
#[derive(Debug, Clone, Deserialize)]
pub struct LearningSection {
    #[serde(default = "default_max_experiences")]
    pub max_experiences: usize,
    /// 产生建议所需的最少观察次数
    #[serde(default = "default_min_frequency")]
    pub min_frequency: u64,
    /// 产生建议所需的最低洞察置信度（严格大于）
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_max_experiences() -> usize {
    1000
}

fn default_min_frequency() -> u64 {
    5
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for LearningSection {
    fn default() -> Self {
        Self {
            max_experiences: default_max_experiences(),
            min_frequency: default_min_frequency(),
            min_confidence: default_min_confidence(),
        }
    }
}

/// [poller] 段：调用方轮询节奏
#[derive(Debug, Clone, Deserialize)]
pub struct PollerSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_interval_secs() -> u64 {
    5
}

fn default_item_delay_ms() -> u64 {
    100
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            item_delay_ms: default_item_delay_ms(),
        }
    }
}

/// [providers] 段：抽取与消息能力提供者开关
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersSection {
    #[serde(default = "default_true")]
    pub extraction_enabled: bool,
    #[serde(default = "default_true")]
    pub communication_enabled: bool,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            extraction_enabled: true,
            communication_enabled: true,
        }
    }
}

/// [logging] 段：text / json；级别可被 RUST_LOG 覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 APFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 APFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("APFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.step_timeout_secs, 10);
        assert_eq!(cfg.orchestrator.max_recovery_attempts, 1);
        assert!(cfg.rules.load_defaults);
        assert_eq!(cfg.learning.min_frequency, 5);
        assert_eq!(cfg.poller.batch_size, 10);
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[orchestrator]\nstep_timeout_secs = 3\ncommunication = false\n\n[poller]\nbatch_size = 2"
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.orchestrator.step_timeout_secs, 3);
        assert!(!cfg.orchestrator.communication);
        assert!(cfg.orchestrator.learning_feedback);
        assert_eq!(cfg.poller.batch_size, 2);
        assert_eq!(cfg.poller.interval_secs, 5);
    }
}
