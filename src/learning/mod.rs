//! 自适应学习：经验日志、模式洞察、适配建议与路由预测

pub mod store;
pub mod types;

pub use store::AdaptiveLearningStore;
pub use types::{
    amount_range_key, vendor_key, ExperienceContext, ExperienceOutcome, ExperienceType, LearningExperience, LearningStats,
    PatternInsight, RecommendedAction, Recommendation, RoutePrediction,
};
