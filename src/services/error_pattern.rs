use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::algorithm::ErrorClassifier;
use crate::services::{clamp_window_days, log_store_failure};
use crate::services::error_trend::{summarize_error_trends, ErrorTrendAnalysis};
use crate::store::{QuestionStore, StoreError};
use crate::types::{
    round_to, ErrorFrequency, ErrorTag, QuestionOutcome, SeverityLevel, TrendDirection,
};

const SYSTEMATIC_RATE_THRESHOLD: f64 = 0.3;
const SYSTEMATIC_MIN_OPPORTUNITIES: usize = 3;
const RECENT_QUESTION_COUNT: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystematicError {
    pub pattern_name: String,
    pub error_type: ErrorTag,
    pub frequency_band: ErrorFrequency,
    pub occurrence_count: usize,
    pub total_opportunities: usize,
    pub impact_score: f64,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementRecommendation {
    pub priority: u8,
    pub title: String,
    pub description: String,
    pub action_items: Vec<String>,
    pub estimated_time: Option<String>,
    pub learning_resources: Vec<String>,
    pub expected_improvement: String,
    pub success_indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressIndicators {
    pub overall_accuracy: f64,
    pub recent_accuracy: f64,
    pub total_practice_count: usize,
    pub improvement_trend: TrendDirection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPatternAnalysis {
    pub student_id: String,
    pub subject: String,
    pub window_description: String,
    pub total_questions: usize,
    pub total_errors: usize,
    pub error_rate: f64,
    pub error_type_distribution: BTreeMap<ErrorTag, usize>,
    pub severity_distribution: BTreeMap<SeverityLevel, usize>,
    pub systematic_errors: Vec<SystematicError>,
    pub recommendations: Vec<ImprovementRecommendation>,
    /// `None` when the window holds no questions.
    pub progress_indicators: Option<ProgressIndicators>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub error_type: ErrorTag,
    pub description: String,
    pub severity: SeverityLevel,
    pub root_cause: String,
    pub correction_suggestion: String,
    pub practice_recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDiagnosis {
    pub question_id: String,
    pub errors: Vec<ErrorDetail>,
    pub score: f64,
    pub feedback: String,
    pub improvements: Vec<String>,
}

/// Error distributions, systematic errors and recommendations for one
/// student and subject.
#[derive(Clone)]
pub struct ErrorPatternAnalyzer {
    questions: Arc<dyn QuestionStore>,
    classifier: Arc<ErrorClassifier>,
}

impl ErrorPatternAnalyzer {
    pub fn new(questions: Arc<dyn QuestionStore>, classifier: Arc<ErrorClassifier>) -> Self {
        Self { questions, classifier }
    }

    pub async fn analyze(
        &self,
        student_id: &str,
        subject: &str,
        window_days: i64,
    ) -> Result<ErrorPatternAnalysis, StoreError> {
        let window_days = clamp_window_days(window_days);
        let now = Utc::now();
        let from = now - Duration::days(window_days);

        let outcomes = self
            .questions
            .fetch(student_id, subject, from, now)
            .await
            .map_err(log_store_failure(student_id, "fetch question outcomes"))?;

        if outcomes.is_empty() {
            tracing::warn!(student_id, subject, window_days, "no question outcomes in analysis window");
        }

        let analysis = self.build_analysis(student_id, subject, window_days, &outcomes, now);
        tracing::info!(
            student_id,
            subject,
            total_questions = analysis.total_questions,
            total_errors = analysis.total_errors,
            systematic_errors = analysis.systematic_errors.len(),
            "error pattern analysis completed"
        );
        Ok(analysis)
    }

    pub async fn error_trends(
        &self,
        student_id: &str,
        subject: &str,
        days: i64,
    ) -> Result<ErrorTrendAnalysis, StoreError> {
        let days = clamp_window_days(days);
        let now = Utc::now();
        let outcomes = self
            .questions
            .fetch(student_id, subject, now - Duration::days(days), now)
            .await
            .map_err(log_store_failure(student_id, "fetch question outcomes"))?;

        let trends = summarize_error_trends(student_id, subject, &outcomes);
        tracing::info!(
            student_id,
            subject,
            days = trends.daily_error_rates.len(),
            trend = ?trends.overall_trend,
            "error trend analysis completed"
        );
        Ok(trends)
    }

    /// Pure part of [`analyze`](Self::analyze), over already fetched outcomes.
    pub fn build_analysis(
        &self,
        student_id: &str,
        subject: &str,
        window_days: i64,
        outcomes: &[QuestionOutcome],
        now: DateTime<Utc>,
    ) -> ErrorPatternAnalysis {
        if outcomes.is_empty() {
            return empty_analysis(student_id, subject, window_days);
        }

        let total_questions = outcomes.len();
        let incorrect: Vec<&QuestionOutcome> = outcomes.iter().filter(|q| !q.is_correct).collect();
        let total_errors = incorrect.len();
        let error_rate = round_to(total_errors as f64 / total_questions as f64, 3);

        let mut error_type_distribution: BTreeMap<ErrorTag, usize> = BTreeMap::new();
        let mut severity_distribution: BTreeMap<SeverityLevel, usize> = BTreeMap::new();
        let mut groups: BTreeMap<ErrorTag, Vec<&QuestionOutcome>> = BTreeMap::new();

        for question in &incorrect {
            for tag in self.classifier.classify(question, subject) {
                *error_type_distribution.entry(tag).or_insert(0) += 1;
                groups.entry(tag).or_default().push(question);
            }
            let severity = SeverityLevel::from_difficulty(question.difficulty_level);
            *severity_distribution.entry(severity).or_insert(0) += 1;
        }

        let systematic_errors = detect_systematic_errors(subject, &groups, total_questions);
        let recommendations = build_recommendations(subject, &systematic_errors);
        let progress_indicators = Some(summarize_progress(outcomes));

        let from = now - Duration::days(window_days);
        ErrorPatternAnalysis {
            student_id: student_id.to_string(),
            subject: subject.to_string(),
            window_description: format!(
                "{} 至 {}",
                from.format("%Y-%m-%d"),
                now.format("%Y-%m-%d")
            ),
            total_questions,
            total_errors,
            error_rate,
            error_type_distribution,
            severity_distribution,
            systematic_errors,
            recommendations,
            progress_indicators,
        }
    }

    /// Per-question breakdown for immediate feedback after grading.
    pub fn diagnose_question(&self, outcome: &QuestionOutcome, subject: &str) -> QuestionDiagnosis {
        let severity = SeverityLevel::from_difficulty(outcome.difficulty_level);
        let errors: Vec<ErrorDetail> = self
            .classifier
            .classify(outcome, subject)
            .into_iter()
            .map(|tag| error_detail(tag, severity, subject))
            .collect();

        let score = if errors.is_empty() {
            1.0
        } else {
            let deduction: f64 = errors.iter().map(|e| e.severity.deduction()).sum();
            round_to((1.0 - deduction).max(0.0), 2)
        };

        let feedback = match errors.first() {
            None => "答案正确！".to_string(),
            Some(first) => format!(
                "发现{}个问题，主要是{}。建议重新检查解题过程。",
                errors.len(),
                first.error_type.label()
            ),
        };

        let mut improvements: Vec<String> = Vec::new();
        for error in &errors {
            if !improvements.contains(&error.correction_suggestion) {
                improvements.push(error.correction_suggestion.clone());
            }
        }

        QuestionDiagnosis {
            question_id: outcome.id.clone(),
            errors,
            score,
            feedback,
            improvements,
        }
    }
}

fn empty_analysis(student_id: &str, subject: &str, window_days: i64) -> ErrorPatternAnalysis {
    ErrorPatternAnalysis {
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        window_description: format!("最近{window_days}天"),
        total_questions: 0,
        total_errors: 0,
        error_rate: 0.0,
        error_type_distribution: BTreeMap::new(),
        severity_distribution: BTreeMap::new(),
        systematic_errors: Vec::new(),
        recommendations: Vec::new(),
        progress_indicators: None,
    }
}

fn detect_systematic_errors(
    subject: &str,
    groups: &BTreeMap<ErrorTag, Vec<&QuestionOutcome>>,
    total_questions: usize,
) -> Vec<SystematicError> {
    if total_questions <= SYSTEMATIC_MIN_OPPORTUNITIES {
        return Vec::new();
    }

    groups
        .iter()
        .filter_map(|(tag, questions)| {
            let rate = questions.len() as f64 / total_questions as f64;
            if rate <= SYSTEMATIC_RATE_THRESHOLD {
                return None;
            }
            let first_occurrence = questions.iter().map(|q| q.created_at).min()?;
            let last_occurrence = questions.iter().map(|q| q.created_at).max()?;

            Some(SystematicError {
                pattern_name: format!("{subject}_{tag}"),
                error_type: *tag,
                frequency_band: ErrorFrequency::from_rate(rate),
                occurrence_count: questions.len(),
                total_opportunities: total_questions,
                impact_score: rate,
                first_occurrence,
                last_occurrence,
                trend: TrendDirection::Stable,
            })
        })
        .collect()
}

fn build_recommendations(subject: &str, systematic_errors: &[SystematicError]) -> Vec<ImprovementRecommendation> {
    let mut recommendations: Vec<ImprovementRecommendation> = systematic_errors
        .iter()
        .map(|error| ImprovementRecommendation {
            priority: if error.frequency_band == ErrorFrequency::Systematic { 5 } else { 3 },
            title: format!("改进{}问题", error.error_type.label()),
            description: format!("该类型错误出现{}次，需要重点关注", error.occurrence_count),
            action_items: action_items(error.error_type),
            estimated_time: Some("2-3周".to_string()),
            learning_resources: vec![
                format!("{subject}基础概念复习"),
                "相关练习题集".to_string(),
                "视频教学资源".to_string(),
            ],
            expected_improvement: "错误率预计降低50%".to_string(),
            success_indicators: vec![
                "连续5题同类型题目全对".to_string(),
                "掌握度提升至80%以上".to_string(),
            ],
        })
        .collect();

    // stable: equal priorities keep detection order
    recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
    recommendations
}

pub fn action_items(tag: ErrorTag) -> Vec<String> {
    let items: &[&str] = match tag {
        ErrorTag::CalculationError => &["加强基础运算练习", "使用计算验证方法", "培养细心检查习惯"],
        ErrorTag::ConceptConfusion => &["重新梳理基础概念", "建立概念对比表", "增加概念应用练习"],
        ErrorTag::FormulaMisuse => &["整理公式使用条件", "练习公式推导过程", "建立公式应用场景库"],
        ErrorTag::LogicalError => &["梳理解题思路", "练习分步推理", "对照标准解法复盘"],
        ErrorTag::StepOmission => &["完整书写解题步骤", "使用步骤检查清单"],
        ErrorTag::UnitError => &["统一单位后再计算", "练习单位换算"],
        ErrorTag::GrammarError => &["复习相关语法规则", "做针对性语法填空练习"],
        ErrorTag::VocabularyError => &["积累词汇搭配", "用新词造句"],
        ErrorTag::SpellingError => &["每日听写易错单词", "按词根记忆拼写"],
        ErrorTag::CarelessMistake => &["答题后逐项检查", "放慢审题速度"],
        _ => &["加强相关知识点练习"],
    };
    items.iter().map(|s| s.to_string()).collect()
}

fn error_detail(tag: ErrorTag, severity: SeverityLevel, subject: &str) -> ErrorDetail {
    let (description, suggestion) = match tag {
        ErrorTag::CalculationError => ("计算过程中出现错误", "仔细检查计算过程，可以验算确认"),
        ErrorTag::ConceptConfusion => ("对基础概念理解有误", "重新学习相关基础概念"),
        ErrorTag::FormulaMisuse => ("公式使用不当或条件不符", "确认公式适用条件，正确套用公式"),
        ErrorTag::LogicalError => ("解题逻辑存在问题", "梳理解题思路，建立正确的逻辑链条"),
        ErrorTag::StepOmission => ("解题步骤不完整", "完整写出解题步骤，不要跳步"),
        ErrorTag::UnitError => ("单位使用或换算有误", "计算前统一单位"),
        ErrorTag::CarelessMistake => ("答案与正确答案非常接近，可能是粗心", "答题后仔细检查"),
        _ => ("未知错误类型", "加强练习"),
    };

    ErrorDetail {
        error_type: tag,
        description: description.to_string(),
        severity,
        root_cause: "需要进一步分析".to_string(),
        correction_suggestion: suggestion.to_string(),
        practice_recommendation: format!("多做{subject}相关练习题"),
    }
}

fn summarize_progress(outcomes: &[QuestionOutcome]) -> ProgressIndicators {
    let mut sorted: Vec<&QuestionOutcome> = outcomes.iter().collect();
    sorted.sort_by_key(|q| q.created_at);

    let recent = &sorted[sorted.len().saturating_sub(RECENT_QUESTION_COUNT)..];
    let overall_accuracy = accuracy(&sorted);
    let recent_accuracy = accuracy(recent);

    ProgressIndicators {
        overall_accuracy: round_to(overall_accuracy, 3),
        recent_accuracy: round_to(recent_accuracy, 3),
        total_practice_count: outcomes.len(),
        improvement_trend: if recent_accuracy > overall_accuracy {
            TrendDirection::Improving
        } else {
            TrendDirection::Stable
        },
    }
}

fn accuracy(questions: &[&QuestionOutcome]) -> f64 {
    if questions.is_empty() {
        return 0.0;
    }
    questions.iter().filter(|q| q.is_correct).count() as f64 / questions.len() as f64
}
