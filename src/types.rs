use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error kinds the classifier can attach to an incorrect answer.
///
/// Declaration order is the iteration order of every tag-keyed map in the
/// crate, so distributions and systematic-error lists come out in a stable
/// order regardless of input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    CalculationError,
    FormulaMisuse,
    ConceptConfusion,
    LogicalError,
    StepOmission,
    UnitError,
    PhysicalPrinciple,
    DiagramAnalysis,
    GrammarError,
    VocabularyError,
    SpellingError,
    ExpressionError,
    ReadingComprehension,
    CarelessMistake,
    MethodError,
    KnowledgeGap,
}

impl ErrorTag {
    pub const ALL: [ErrorTag; 16] = [
        ErrorTag::CalculationError,
        ErrorTag::FormulaMisuse,
        ErrorTag::ConceptConfusion,
        ErrorTag::LogicalError,
        ErrorTag::StepOmission,
        ErrorTag::UnitError,
        ErrorTag::PhysicalPrinciple,
        ErrorTag::DiagramAnalysis,
        ErrorTag::GrammarError,
        ErrorTag::VocabularyError,
        ErrorTag::SpellingError,
        ErrorTag::ExpressionError,
        ErrorTag::ReadingComprehension,
        ErrorTag::CarelessMistake,
        ErrorTag::MethodError,
        ErrorTag::KnowledgeGap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CalculationError => "calculation_error",
            Self::FormulaMisuse => "formula_misuse",
            Self::ConceptConfusion => "concept_confusion",
            Self::LogicalError => "logical_error",
            Self::StepOmission => "step_omission",
            Self::UnitError => "unit_error",
            Self::PhysicalPrinciple => "physical_principle",
            Self::DiagramAnalysis => "diagram_analysis",
            Self::GrammarError => "grammar_error",
            Self::VocabularyError => "vocabulary_error",
            Self::SpellingError => "spelling_error",
            Self::ExpressionError => "expression_error",
            Self::ReadingComprehension => "reading_comprehension",
            Self::CarelessMistake => "careless_mistake",
            Self::MethodError => "method_error",
            Self::KnowledgeGap => "knowledge_gap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.iter().copied().find(|tag| tag.as_str() == s)
    }

    /// Human-readable name used in recommendation texts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CalculationError => "计算错误",
            Self::FormulaMisuse => "公式误用",
            Self::ConceptConfusion => "概念混淆",
            Self::LogicalError => "逻辑错误",
            Self::StepOmission => "步骤遗漏",
            Self::UnitError => "单位错误",
            Self::PhysicalPrinciple => "物理原理错误",
            Self::DiagramAnalysis => "图像分析错误",
            Self::GrammarError => "语法错误",
            Self::VocabularyError => "词汇错误",
            Self::SpellingError => "拼写错误",
            Self::ExpressionError => "表达错误",
            Self::ReadingComprehension => "理解错误",
            Self::CarelessMistake => "粗心错误",
            Self::MethodError => "方法错误",
            Self::KnowledgeGap => "知识缺陷",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLevel {
    /// Mistakes on easy questions weigh more than mistakes on hard ones.
    pub fn from_difficulty(difficulty_level: Option<u8>) -> Self {
        match difficulty_level {
            Some(level) if level <= 2 => Self::High,
            Some(level) if level >= 4 => Self::Low,
            _ => Self::Medium,
        }
    }

    pub fn deduction(&self) -> f64 {
        match self {
            Self::Critical => 0.5,
            Self::High => 0.3,
            Self::Medium => 0.2,
            Self::Low => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFrequency {
    Rare,
    Occasional,
    Frequent,
    Systematic,
}

impl ErrorFrequency {
    pub fn from_rate(rate: f64) -> Self {
        if rate < 0.1 {
            Self::Rare
        } else if rate < 0.3 {
            Self::Occasional
        } else if rate < 0.6 {
            Self::Frequent
        } else {
            Self::Systematic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Worsening,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Math,
    Physics,
    English,
    Other(String),
}

impl Subject {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "math" | "maths" | "mathematics" | "数学" => Self::Math,
            "physics" | "物理" => Self::Physics,
            "english" | "英语" => Self::English,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One graded question as supplied by the host. Immutable once created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub is_correct: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub difficulty_level: Option<u8>,
    #[serde(default)]
    pub error_text: Option<String>,
    #[serde(default)]
    pub student_answer: Option<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub knowledge_point_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl QuestionOutcome {
    pub fn error_text(&self) -> &str {
        self.error_text.as_deref().map(str::trim).unwrap_or("")
    }

    /// Both answers, when the host supplied a structured pair.
    pub fn answer_pair(&self) -> Option<(&str, &str)> {
        let student = self.student_answer.as_deref().map(str::trim)?;
        let correct = self.correct_answer.as_deref().map(str::trim)?;
        if student.is_empty() || correct.is_empty() {
            return None;
        }
        Some((student, correct))
    }

    /// Score scaled to `[0,1]` when a maximum is known, the raw score otherwise.
    pub fn normalized_score(&self) -> Option<f64> {
        let score = self.score.filter(|s| s.is_finite())?;
        match self.max_score.filter(|m| m.is_finite() && *m > 0.0) {
            Some(max) => Some((score / max).clamp(0.0, 1.0)),
            None => Some(score),
        }
    }
}

/// Running per-student counters for one knowledge point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePointProgress {
    pub student_id: String,
    pub knowledge_point_id: String,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub accuracy_rate: f64,
    pub mastery_level: f64,
    pub confidence_score: Option<f64>,
    pub common_errors: BTreeMap<ErrorTag, u32>,
    pub first_learned_at: DateTime<Utc>,
    pub last_practiced_at: DateTime<Utc>,
    pub mastery_achieved_at: Option<DateTime<Utc>>,
}

impl KnowledgePointProgress {
    pub fn new(student_id: &str, knowledge_point_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            student_id: student_id.to_string(),
            knowledge_point_id: knowledge_point_id.to_string(),
            total_attempts: 0,
            correct_attempts: 0,
            accuracy_rate: 0.0,
            mastery_level: 0.0,
            confidence_score: None,
            common_errors: BTreeMap::new(),
            first_learned_at: now,
            last_practiced_at: now,
            mastery_achieved_at: None,
        }
    }

    pub fn recompute_accuracy(&mut self) {
        self.correct_attempts = self.correct_attempts.min(self.total_attempts);
        self.accuracy_rate = if self.total_attempts > 0 {
            self.correct_attempts as f64 / self.total_attempts as f64
        } else {
            0.0
        };
    }
}

/// A persisted progress row joined with its knowledge point's display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePointRecord {
    pub name: String,
    pub progress: KnowledgePointProgress,
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_difficulty() {
        assert_eq!(SeverityLevel::from_difficulty(Some(1)), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_difficulty(Some(2)), SeverityLevel::High);
        assert_eq!(SeverityLevel::from_difficulty(Some(3)), SeverityLevel::Medium);
        assert_eq!(SeverityLevel::from_difficulty(Some(4)), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_difficulty(Some(5)), SeverityLevel::Low);
        assert_eq!(SeverityLevel::from_difficulty(None), SeverityLevel::Medium);
    }

    #[test]
    fn test_frequency_bands() {
        assert_eq!(ErrorFrequency::from_rate(0.05), ErrorFrequency::Rare);
        assert_eq!(ErrorFrequency::from_rate(0.1), ErrorFrequency::Occasional);
        assert_eq!(ErrorFrequency::from_rate(0.3), ErrorFrequency::Frequent);
        assert_eq!(ErrorFrequency::from_rate(0.59), ErrorFrequency::Frequent);
        assert_eq!(ErrorFrequency::from_rate(0.6), ErrorFrequency::Systematic);
        assert_eq!(ErrorFrequency::from_rate(1.0), ErrorFrequency::Systematic);
    }

    #[test]
    fn test_error_tag_parse_matches_serde() {
        for tag in ErrorTag::ALL {
            assert_eq!(ErrorTag::parse(tag.as_str()), Some(tag));
            let json = serde_json::to_string(&tag).unwrap();
            assert_eq!(json, format!("\"{}\"", tag.as_str()));
        }
        assert_eq!(ErrorTag::parse("nonsense"), None);
    }

    #[test]
    fn test_subject_parse() {
        assert_eq!(Subject::parse("Math"), Subject::Math);
        assert_eq!(Subject::parse("数学"), Subject::Math);
        assert_eq!(Subject::parse("physics"), Subject::Physics);
        assert_eq!(Subject::parse("英语"), Subject::English);
        assert_eq!(Subject::parse(" History "), Subject::Other("history".to_string()));
    }

    #[test]
    fn test_normalized_score() {
        let outcome = QuestionOutcome {
            score: Some(8.0),
            max_score: Some(10.0),
            ..Default::default()
        };
        assert_eq!(outcome.normalized_score(), Some(0.8));

        let raw = QuestionOutcome {
            score: Some(0.5),
            ..Default::default()
        };
        assert_eq!(raw.normalized_score(), Some(0.5));
        assert_eq!(QuestionOutcome::default().normalized_score(), None);
    }

    #[test]
    fn test_recompute_accuracy_clamps_correct_count() {
        let mut row = KnowledgePointProgress::new("s1", "kp1", Utc::now());
        row.total_attempts = 2;
        row.correct_attempts = 5;
        row.recompute_accuracy();
        assert_eq!(row.correct_attempts, 2);
        assert_eq!(row.accuracy_rate, 1.0);
    }
}
