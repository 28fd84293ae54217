pub mod error_pattern;
pub mod error_trend;
pub mod learning_pattern;
pub mod progress;

pub use error_pattern::{
    ErrorDetail, ErrorPatternAnalysis, ErrorPatternAnalyzer, ImprovementRecommendation,
    ProgressIndicators, QuestionDiagnosis, SystematicError,
};
pub use error_trend::{DailyErrorRate, ErrorTrendAnalysis, RiskLevel, WeeklyErrorSummary};
pub use learning_pattern::{DailyActivity, LearningPatternSummary, SubjectPreference};
pub use progress::{
    DailyLearningPoint, KnowledgePointRecommendation, LearningTrendReport, ProgressTracker,
    RecommendationPriority, SubjectProgress,
};

use crate::store::StoreError;

pub const MAX_WINDOW_DAYS: i64 = 365;
pub const MAX_RECOMMENDATION_LIMIT: usize = 50;

pub fn clamp_window_days(days: i64) -> i64 {
    days.clamp(1, MAX_WINDOW_DAYS)
}

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RECOMMENDATION_LIMIT)
}

/// Logs a failed store call and hands the error back unchanged.
pub(crate) fn log_store_failure<'a>(
    student_id: &'a str,
    operation: &'static str,
) -> impl FnOnce(StoreError) -> StoreError + 'a {
    move |err| {
        tracing::error!(student_id, operation, error = %err, "store call failed");
        err
    }
}
