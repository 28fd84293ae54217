use std::sync::Arc;

use crate::algorithm::ErrorClassifier;
use crate::services::{
    ErrorPatternAnalysis, ErrorPatternAnalyzer, ErrorTrendAnalysis, KnowledgePointRecommendation,
    LearningPatternSummary, LearningTrendReport, ProgressTracker, QuestionDiagnosis, SubjectProgress,
};
use crate::store::{KnowledgePointStore, QuestionStore, StoreError};
use crate::types::{KnowledgePointProgress, QuestionOutcome};

/// Entry point for hosts. Cheap to clone; clones share stores and the
/// per-knowledge-point update locks.
#[derive(Clone)]
pub struct AnalyticsEngine {
    analyzer: ErrorPatternAnalyzer,
    tracker: ProgressTracker,
}

impl AnalyticsEngine {
    pub fn new(questions: Arc<dyn QuestionStore>, knowledge_points: Arc<dyn KnowledgePointStore>) -> Self {
        let classifier = Arc::new(ErrorClassifier::new());
        Self {
            analyzer: ErrorPatternAnalyzer::new(Arc::clone(&questions), Arc::clone(&classifier)),
            tracker: ProgressTracker::new(questions, knowledge_points, classifier),
        }
    }

    pub async fn analyze(
        &self,
        student_id: &str,
        subject: &str,
        window_days: i64,
    ) -> Result<ErrorPatternAnalysis, StoreError> {
        self.analyzer.analyze(student_id, subject, window_days).await
    }

    pub async fn error_trends(
        &self,
        student_id: &str,
        subject: &str,
        days: i64,
    ) -> Result<ErrorTrendAnalysis, StoreError> {
        self.analyzer.error_trends(student_id, subject, days).await
    }

    pub fn diagnose_question(&self, outcome: &QuestionOutcome, subject: &str) -> QuestionDiagnosis {
        self.analyzer.diagnose_question(outcome, subject)
    }

    pub async fn compute_subject_progress(
        &self,
        student_id: &str,
        subject: &str,
        window_days: i64,
    ) -> Result<SubjectProgress, StoreError> {
        self.tracker
            .compute_subject_progress(student_id, subject, window_days)
            .await
    }

    pub async fn update_knowledge_point_progress(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        is_correct: bool,
        confidence: Option<f64>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        self.tracker
            .update_knowledge_point_progress(student_id, knowledge_point_id, is_correct, confidence)
            .await
    }

    pub async fn record_question_outcome(
        &self,
        student_id: &str,
        subject: &str,
        outcome: &QuestionOutcome,
    ) -> Result<Vec<KnowledgePointProgress>, StoreError> {
        self.tracker
            .record_question_outcome(student_id, subject, outcome)
            .await
    }

    pub async fn learning_recommendations(
        &self,
        student_id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgePointRecommendation>, StoreError> {
        self.tracker
            .learning_recommendations(student_id, subject, limit)
            .await
    }

    pub async fn learning_trends(
        &self,
        student_id: &str,
        subject: &str,
        days: i64,
    ) -> Result<LearningTrendReport, StoreError> {
        self.tracker.learning_trends(student_id, subject, days).await
    }

    pub async fn learning_patterns(
        &self,
        student_id: &str,
        subjects: &[String],
        days: i64,
    ) -> Result<LearningPatternSummary, StoreError> {
        self.tracker.learning_patterns(student_id, subjects, days).await
    }
}
