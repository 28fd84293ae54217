use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::algorithm::mastery::{
    learning_velocity, mastery_rate, predict_mastery_days, DEFAULT_VELOCITY_WINDOW_DAYS,
    MASTERY_THRESHOLD, MIN_ATTEMPTS_FOR_CONFIDENCE, WEAK_POINT_THRESHOLD,
};
use crate::algorithm::ErrorClassifier;
use crate::locks::KeyedLocks;
use crate::services::learning_pattern::{summarize_learning_patterns, LearningPatternSummary};
use crate::services::{clamp_limit, clamp_window_days, log_store_failure};
use crate::store::{KnowledgePointStore, QuestionStore, StoreError};
use crate::types::{round_to, ErrorTag, KnowledgePointProgress, KnowledgePointRecord, QuestionOutcome};

/// Knowledge points enter recommendations with fewer attempts than
/// `identify_weak_points` requires.
pub const WEAK_POINT_MIN_ATTEMPTS: u32 = 2;
pub const RECENT_PERFORMANCE_DAYS: i64 = 7;
pub const ASSUMED_VELOCITY: f64 = 0.05;
const BASE_PRACTICE_MINUTES: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectProgress {
    pub subject: String,
    pub mastery_rate: f64,
    pub total_questions: usize,
    pub correct_questions: usize,
    pub recent_performance: f64,
    pub weak_knowledge_points: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePointRecommendation {
    pub knowledge_point_id: String,
    pub knowledge_point_name: String,
    pub current_mastery: f64,
    pub total_attempts: u32,
    pub priority: RecommendationPriority,
    pub estimated_practice_minutes: u32,
    pub strategies: Vec<String>,
    pub estimated_days_to_mastery: Option<u32>,
    pub common_errors: BTreeMap<ErrorTag, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyLearningPoint {
    pub date: NaiveDate,
    pub accuracy_rate: f64,
    pub practice_count: usize,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningTrendReport {
    pub student_id: String,
    pub subject: String,
    pub daily_points: Vec<DailyLearningPoint>,
    pub velocity: f64,
    pub predicted_mastery_days: Option<u32>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    questions: Arc<dyn QuestionStore>,
    knowledge_points: Arc<dyn KnowledgePointStore>,
    classifier: Arc<ErrorClassifier>,
    locks: Arc<KeyedLocks>,
}

impl ProgressTracker {
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        knowledge_points: Arc<dyn KnowledgePointStore>,
        classifier: Arc<ErrorClassifier>,
    ) -> Self {
        Self {
            questions,
            knowledge_points,
            classifier,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub async fn compute_subject_progress(
        &self,
        student_id: &str,
        subject: &str,
        window_days: i64,
    ) -> Result<SubjectProgress, StoreError> {
        let window_days = clamp_window_days(window_days);
        let now = Utc::now();
        let outcomes = self
            .questions
            .fetch(student_id, subject, now - Duration::days(window_days), now)
            .await
            .map_err(log_store_failure(student_id, "fetch question outcomes"))?;
        let records = self
            .knowledge_points
            .list_by_subject(student_id, subject)
            .await
            .map_err(log_store_failure(student_id, "list knowledge points"))?;

        let progress = summarize_subject_progress(subject, &outcomes, &records, now);
        tracing::info!(
            student_id,
            subject,
            total_questions = progress.total_questions,
            mastery_rate = progress.mastery_rate,
            weak_points = progress.weak_knowledge_points.len(),
            "subject progress computed"
        );
        Ok(progress)
    }

    /// Applies one graded attempt to a knowledge point row.
    ///
    /// Calls for the same `(student_id, knowledge_point_id)` run one at a time.
    pub async fn update_knowledge_point_progress(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        is_correct: bool,
        confidence: Option<f64>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        self.update_row(student_id, knowledge_point_id, is_correct, confidence, &BTreeSet::new())
            .await
    }

    /// Classifies a freshly graded question and updates every knowledge point it covers.
    pub async fn record_question_outcome(
        &self,
        student_id: &str,
        subject: &str,
        outcome: &QuestionOutcome,
    ) -> Result<Vec<KnowledgePointProgress>, StoreError> {
        let tags = if outcome.is_correct {
            BTreeSet::new()
        } else {
            self.classifier.classify(outcome, subject)
        };

        let mut seen = BTreeSet::new();
        let mut updated = Vec::with_capacity(outcome.knowledge_point_ids.len());
        for knowledge_point_id in &outcome.knowledge_point_ids {
            if !seen.insert(knowledge_point_id.as_str()) {
                continue;
            }
            let row = self
                .update_row(student_id, knowledge_point_id, outcome.is_correct, None, &tags)
                .await?;
            updated.push(row);
        }

        tracing::info!(
            student_id,
            subject,
            question_id = %outcome.id,
            knowledge_points = updated.len(),
            error_tags = tags.len(),
            "question outcome recorded"
        );
        Ok(updated)
    }

    async fn update_row(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        is_correct: bool,
        confidence: Option<f64>,
        tags: &BTreeSet<ErrorTag>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        let _guard = self.locks.lock(student_id, knowledge_point_id).await;

        let now = Utc::now();
        let mut row = self
            .knowledge_points
            .get_or_create(student_id, knowledge_point_id, now)
            .await
            .map_err(log_store_failure(student_id, "load knowledge point progress"))?;
        apply_attempt(&mut row, is_correct, confidence, tags, now);

        self.knowledge_points
            .save(&row)
            .await
            .map_err(log_store_failure(student_id, "save knowledge point progress"))?;

        tracing::debug!(
            student_id,
            knowledge_point_id,
            total_attempts = row.total_attempts,
            mastery_level = row.mastery_level,
            "knowledge point progress updated"
        );
        Ok(row)
    }

    pub async fn learning_recommendations(
        &self,
        student_id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgePointRecommendation>, StoreError> {
        let records = self
            .knowledge_points
            .list_by_subject(student_id, subject)
            .await
            .map_err(log_store_failure(student_id, "list knowledge points"))?;
        let recommendations = build_recommendations(&records, clamp_limit(limit));
        tracing::info!(
            student_id,
            subject,
            count = recommendations.len(),
            "learning recommendations generated"
        );
        Ok(recommendations)
    }

    pub async fn learning_trends(
        &self,
        student_id: &str,
        subject: &str,
        days: i64,
    ) -> Result<LearningTrendReport, StoreError> {
        let days = clamp_window_days(days);
        let now = Utc::now();
        let outcomes = self
            .questions
            .fetch(student_id, subject, now - Duration::days(days), now)
            .await
            .map_err(log_store_failure(student_id, "fetch question outcomes"))?;

        let report = summarize_learning_trends(student_id, subject, &outcomes);
        tracing::info!(
            student_id,
            subject,
            days = report.daily_points.len(),
            velocity = report.velocity,
            "learning trends computed"
        );
        Ok(report)
    }

    pub async fn learning_patterns(
        &self,
        student_id: &str,
        subjects: &[String],
        days: i64,
    ) -> Result<LearningPatternSummary, StoreError> {
        let days = clamp_window_days(days);
        let now = Utc::now();
        let from = now - Duration::days(days);

        let mut per_subject = Vec::with_capacity(subjects.len());
        for subject in subjects {
            let outcomes = self
                .questions
                .fetch(student_id, subject, from, now)
                .await
                .map_err(log_store_failure(student_id, "fetch question outcomes"))?;
            per_subject.push((subject.clone(), outcomes));
        }

        let summary = summarize_learning_patterns(student_id, &per_subject);
        tracing::info!(
            student_id,
            subjects = subjects.len(),
            study_days = summary.total_study_days,
            consistency = summary.learning_consistency,
            "learning patterns computed"
        );
        Ok(summary)
    }
}

/// Counter update for one attempt. Mastery is only estimated once enough
/// attempts exist; the achievement timestamp is written once.
pub fn apply_attempt(
    row: &mut KnowledgePointProgress,
    is_correct: bool,
    confidence: Option<f64>,
    tags: &BTreeSet<ErrorTag>,
    now: DateTime<Utc>,
) {
    row.total_attempts = row.total_attempts.saturating_add(1);
    if is_correct {
        row.correct_attempts = row.correct_attempts.saturating_add(1);
    }
    row.recompute_accuracy();

    if i64::from(row.total_attempts) >= MIN_ATTEMPTS_FOR_CONFIDENCE {
        row.mastery_level = mastery_rate(
            i64::from(row.correct_attempts),
            i64::from(row.total_attempts),
            row.accuracy_rate,
        );
    }

    if let Some(confidence) = confidence {
        row.confidence_score = Some(if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        });
    }

    for tag in tags {
        *row.common_errors.entry(*tag).or_insert(0) += 1;
    }

    row.last_practiced_at = now;
    if row.mastery_level >= MASTERY_THRESHOLD && row.mastery_achieved_at.is_none() {
        row.mastery_achieved_at = Some(now);
    }
}

pub fn summarize_subject_progress(
    subject: &str,
    outcomes: &[QuestionOutcome],
    records: &[KnowledgePointRecord],
    now: DateTime<Utc>,
) -> SubjectProgress {
    let total_questions = outcomes.len();
    let correct_questions = outcomes.iter().filter(|q| q.is_correct).count();
    let historical = if total_questions > 0 {
        correct_questions as f64 / total_questions as f64
    } else {
        0.0
    };

    let recent_from = now - Duration::days(RECENT_PERFORMANCE_DAYS);
    let (recent_total, recent_correct) = outcomes
        .iter()
        .filter(|q| q.created_at >= recent_from)
        .fold((0usize, 0usize), |(total, correct), q| {
            (total + 1, correct + usize::from(q.is_correct))
        });
    let recent_performance = if recent_total > 0 {
        recent_correct as f64 / recent_total as f64
    } else {
        historical
    };

    let mastery = mastery_rate(
        i64::try_from(correct_questions).unwrap_or(i64::MAX),
        i64::try_from(total_questions).unwrap_or(i64::MAX),
        recent_performance,
    );

    SubjectProgress {
        subject: subject.to_string(),
        mastery_rate: round_to(mastery, 3),
        total_questions,
        correct_questions,
        recent_performance: round_to(recent_performance, 3),
        weak_knowledge_points: weak_records(records).map(|r| r.name.clone()).collect(),
    }
}

fn weak_records(records: &[KnowledgePointRecord]) -> impl Iterator<Item = &KnowledgePointRecord> {
    let mut weak: Vec<&KnowledgePointRecord> = records
        .iter()
        .filter(|r| {
            r.progress.mastery_level < WEAK_POINT_THRESHOLD
                && r.progress.total_attempts >= WEAK_POINT_MIN_ATTEMPTS
        })
        .collect();
    weak.sort_by(|a, b| a.progress.mastery_level.total_cmp(&b.progress.mastery_level));
    weak.into_iter()
}

pub fn build_recommendations(records: &[KnowledgePointRecord], limit: usize) -> Vec<KnowledgePointRecommendation> {
    weak_records(records)
        .take(limit)
        .map(|record| {
            let progress = &record.progress;
            let mastery = progress.mastery_level.clamp(0.0, 1.0);
            KnowledgePointRecommendation {
                knowledge_point_id: progress.knowledge_point_id.clone(),
                knowledge_point_name: record.name.clone(),
                current_mastery: round_to(mastery, 3),
                total_attempts: progress.total_attempts,
                priority: if mastery < 0.4 {
                    RecommendationPriority::High
                } else {
                    RecommendationPriority::Medium
                },
                estimated_practice_minutes: practice_minutes(mastery),
                strategies: improvement_strategies(mastery, &progress.common_errors),
                estimated_days_to_mastery: predict_mastery_days(mastery, MASTERY_THRESHOLD, ASSUMED_VELOCITY),
                common_errors: progress.common_errors.clone(),
            }
        })
        .collect()
}

fn practice_minutes(mastery: f64) -> u32 {
    (BASE_PRACTICE_MINUTES * (1.0 + (1.0 - mastery) * 2.0)).round() as u32
}

pub fn improvement_strategies(mastery: f64, common_errors: &BTreeMap<ErrorTag, u32>) -> Vec<String> {
    let mut strategies: Vec<String> = if mastery < 0.3 {
        vec!["建议从基础概念开始复习".into(), "寻求老师或同学的帮助".into()]
    } else if mastery < 0.6 {
        vec!["增加相关练习题的数量".into(), "总结常见错误和解题技巧".into()]
    } else {
        vec!["通过变式练习巩固理解".into(), "尝试教别人来加深理解".into()]
    };

    if common_errors.contains_key(&ErrorTag::CalculationError) {
        strategies.push("注意计算细节，使用验算方法".into());
    }
    if common_errors.contains_key(&ErrorTag::ConceptConfusion) {
        strategies.push("重点理解概念区别和应用场景".into());
    }
    strategies
}

pub fn summarize_learning_trends(
    student_id: &str,
    subject: &str,
    outcomes: &[QuestionOutcome],
) -> LearningTrendReport {
    #[derive(Default)]
    struct Bucket {
        total: usize,
        correct: usize,
        score_sum: f64,
        scored: usize,
    }

    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
    for outcome in outcomes {
        let bucket = buckets.entry(outcome.created_at.date_naive()).or_default();
        bucket.total += 1;
        bucket.correct += usize::from(outcome.is_correct);
        if let Some(score) = outcome.normalized_score() {
            bucket.score_sum += score;
            bucket.scored += 1;
        }
    }

    let daily_points: Vec<DailyLearningPoint> = buckets
        .into_iter()
        .map(|(date, b)| DailyLearningPoint {
            date,
            accuracy_rate: round_to(b.correct as f64 / b.total as f64, 3),
            practice_count: b.total,
            average_score: if b.scored > 0 {
                round_to(b.score_sum / b.scored as f64, 3)
            } else {
                0.0
            },
        })
        .collect();

    let history: Vec<(DateTime<Utc>, f64)> = daily_points
        .iter()
        .filter_map(|p| {
            let midnight = p.date.and_hms_opt(0, 0, 0)?;
            Some((Utc.from_utc_datetime(&midnight), p.accuracy_rate))
        })
        .collect();
    let velocity = learning_velocity(&history, DEFAULT_VELOCITY_WINDOW_DAYS);
    let predicted_mastery_days = daily_points
        .last()
        .and_then(|p| predict_mastery_days(p.accuracy_rate, MASTERY_THRESHOLD, velocity));

    LearningTrendReport {
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        daily_points,
        velocity: round_to(velocity, 4),
        predicted_mastery_days,
    }
}
