//! 推理「风味」：模拟思考延迟与措辞变化
//!
//! 与决策表完全隔离：决策只依赖输入，风味只影响耗时与说明文字。测试用 `NoFlavor` 保持确定性。

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use super::WorkerRole;

pub trait ReasoningFlavor: Send + Sync {
    /// 执行前的模拟思考时长
    fn thinking_delay(&self, role: WorkerRole) -> Duration;

    /// 对 topic 生成一句说明
    fn phrase(&self, role: WorkerRole, topic: &str) -> String;
}

/// 无延迟、固定措辞
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFlavor;

impl ReasoningFlavor for NoFlavor {
    fn thinking_delay(&self, _role: WorkerRole) -> Duration {
        Duration::ZERO
    }

    fn phrase(&self, role: WorkerRole, topic: &str) -> String {
        format!("{}: {topic}", role.as_str())
    }
}

const OPENERS: &[&str] = &[
    "Having reviewed the document,",
    "Based on the available fields,",
    "After cross-checking the details,",
    "Considering the vendor profile,",
];

/// 随机延迟 + 随机开场白
#[derive(Debug, Clone)]
pub struct SimulatedFlavor {
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl SimulatedFlavor {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms: min_delay_ms.min(max_delay_ms),
            max_delay_ms: max_delay_ms.max(min_delay_ms),
        }
    }
}

impl Default for SimulatedFlavor {
    fn default() -> Self {
        Self::new(50, 300)
    }
}

impl ReasoningFlavor for SimulatedFlavor {
    fn thinking_delay(&self, role: WorkerRole) -> Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.min_delay_ms..=self.max_delay_ms);
        // 协调者思考更久
        let factor = if role == WorkerRole::Coordinator { 2 } else { 1 };
        Duration::from_millis(base * factor)
    }

    fn phrase(&self, role: WorkerRole, topic: &str) -> String {
        let opener = OPENERS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Reviewing,");
        format!("{opener} {} concludes: {topic}", role.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flavor_is_deterministic() {
        let flavor = NoFlavor;
        assert_eq!(flavor.thinking_delay(WorkerRole::Router), Duration::ZERO);
        assert_eq!(
            flavor.phrase(WorkerRole::Router, "auto approve"),
            "workflow_router: auto approve"
        );
    }

    #[test]
    fn test_simulated_delay_in_bounds() {
        let flavor = SimulatedFlavor::new(10, 20);
        for _ in 0..20 {
            let d = flavor.thinking_delay(WorkerRole::Validator);
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        let d = flavor.thinking_delay(WorkerRole::Coordinator);
        assert!(d >= Duration::from_millis(20) && d <= Duration::from_millis(40));
    }

    #[test]
    fn test_simulated_phrase_keeps_topic() {
        let phrase = SimulatedFlavor::default().phrase(WorkerRole::Extractor, "3 fields read");
        assert!(phrase.ends_with("document_extractor concludes: 3 fields read"));
    }
}
