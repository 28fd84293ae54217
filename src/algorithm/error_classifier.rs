//! Error classification
//!
//! Maps free-text error commentary to [`ErrorTag`]s using per-subject pattern
//! groups. Each group contributes its tag at most once; several groups may
//! match the same text. When no group matches, the student/correct answer
//! pair is compared heuristically, and as a last resort the generic
//! knowledge-gap tag is returned, so an incorrect answer always yields at
//! least one tag.

use std::collections::{BTreeSet, HashSet};

use regex::{Regex, RegexBuilder};

use crate::types::{ErrorTag, QuestionOutcome, Subject};

const CARELESS_SIMILARITY_THRESHOLD: f64 = 0.7;

const QUANTITATIVE_PATTERNS: &[(ErrorTag, &[&str])] = &[
    (
        ErrorTag::CalculationError,
        &[r"计算.*错误", r"算.*错", r"加减乘除", r"运算.*错误", r"calculation (error|mistake)", r"arithmetic"],
    ),
    (
        ErrorTag::FormulaMisuse,
        &[r"公式.*错误", r"公式.*用错", r"套用.*错误", r"公式.*不当", r"wrong formula", r"formula (misuse|error)"],
    ),
    (
        ErrorTag::ConceptConfusion,
        &[r"概念.*混淆", r"概念.*错误", r"理解.*错误", r"概念.*不清", r"concept(ual)? (confusion|error)", r"misunderst"],
    ),
    (
        ErrorTag::LogicalError,
        &[r"逻辑.*错误", r"推理.*错误", r"思路.*错误", r"逻辑.*不当", r"logic(al)? error", r"reasoning error"],
    ),
    (
        ErrorTag::StepOmission,
        &[r"步骤.*遗漏", r"缺少.*步骤", r"跳步", r"步骤.*不完整", r"missing step", r"skipped step"],
    ),
];

const PHYSICS_PATTERNS: &[(ErrorTag, &[&str])] = &[
    (
        ErrorTag::UnitError,
        &[r"单位.*错误", r"量纲.*错误", r"单位.*不统一", r"单位.*转换", r"unit (error|conversion)"],
    ),
    (
        ErrorTag::PhysicalPrinciple,
        &[r"物理.*原理", r"定律.*应用", r"原理.*错误", r"定律.*错误", r"physical principle", r"wrong law"],
    ),
    (
        ErrorTag::DiagramAnalysis,
        &[r"图.*分析", r"图像.*错误", r"图表.*理解", r"图形.*分析", r"diagram", r"graph (reading|analysis)"],
    ),
];

const ENGLISH_PATTERNS: &[(ErrorTag, &[&str])] = &[
    (
        ErrorTag::GrammarError,
        &[r"语法.*错误", r"时态.*错误", r"语法.*不当", r"句法.*错误", r"grammar", r"tense"],
    ),
    (
        ErrorTag::VocabularyError,
        &[r"词汇.*错误", r"单词.*用错", r"词汇.*选择", r"用词.*不当", r"vocabulary", r"word choice"],
    ),
    (
        ErrorTag::SpellingError,
        &[r"拼写.*错误", r"单词.*拼写", r"字母.*错误", r"spelling", r"misspel"],
    ),
];

struct PatternGroup {
    tag: ErrorTag,
    patterns: Vec<Regex>,
}

impl PatternGroup {
    fn compile(groups: &[(ErrorTag, &[&str])]) -> Vec<Self> {
        groups
            .iter()
            .map(|(tag, sources)| PatternGroup {
                tag: *tag,
                patterns: sources
                    .iter()
                    .filter_map(|source| {
                        RegexBuilder::new(source)
                            .case_insensitive(true)
                            .build()
                            .map_err(|err| {
                                tracing::warn!(pattern = %source, error = %err, "skipping invalid error pattern");
                            })
                            .ok()
                    })
                    .collect(),
            })
            .collect()
    }

    fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

pub struct ErrorClassifier {
    quantitative: Vec<PatternGroup>,
    physics: Vec<PatternGroup>,
    english: Vec<PatternGroup>,
    numeric_token: Option<Regex>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            quantitative: PatternGroup::compile(QUANTITATIVE_PATTERNS),
            physics: PatternGroup::compile(PHYSICS_PATTERNS),
            english: PatternGroup::compile(ENGLISH_PATTERNS),
            numeric_token: Regex::new(r"-?\d+\.?\d*").ok(),
        }
    }

    /// Tags for one graded question.
    ///
    /// A correct outcome only carries tags that its commentary names
    /// explicitly; an incorrect one always gets at least one tag.
    pub fn classify(&self, outcome: &QuestionOutcome, subject: &str) -> BTreeSet<ErrorTag> {
        if outcome.is_correct {
            let text = outcome.error_text();
            if text.is_empty() {
                return BTreeSet::new();
            }
            return self.match_patterns(text, &Subject::parse(subject));
        }
        self.classify_text(outcome.error_text(), subject, outcome.answer_pair())
    }

    /// Tags for an incorrect answer described by `error_text`. Never empty.
    pub fn classify_text(
        &self,
        error_text: &str,
        subject: &str,
        answers: Option<(&str, &str)>,
    ) -> BTreeSet<ErrorTag> {
        let subject = Subject::parse(subject);
        let mut tags = self.match_patterns(error_text.trim(), &subject);

        if tags.is_empty() {
            if let Some((student, correct)) = answers {
                if let Some(tag) = self.analyze_answer_difference(student, correct) {
                    tags.insert(tag);
                }
            }
        }

        if tags.is_empty() {
            tags.insert(ErrorTag::KnowledgeGap);
        }
        tags
    }

    fn groups_for(&self, subject: &Subject) -> Vec<&PatternGroup> {
        match subject {
            Subject::Math => self.quantitative.iter().collect(),
            Subject::Physics => self.quantitative.iter().chain(self.physics.iter()).collect(),
            Subject::English => self.english.iter().collect(),
            Subject::Other(_) => Vec::new(),
        }
    }

    fn match_patterns(&self, text: &str, subject: &Subject) -> BTreeSet<ErrorTag> {
        if text.is_empty() {
            return BTreeSet::new();
        }
        self.groups_for(subject)
            .into_iter()
            .filter(|group| group.is_match(text))
            .map(|group| group.tag)
            .collect()
    }

    fn analyze_answer_difference(&self, student: &str, correct: &str) -> Option<ErrorTag> {
        if self.looks_like_calculation_error(student, correct) {
            Some(ErrorTag::CalculationError)
        } else if looks_like_careless_mistake(student, correct) {
            Some(ErrorTag::CarelessMistake)
        } else {
            None
        }
    }

    /// Same amount of numbers in both answers, but different values.
    pub fn looks_like_calculation_error(&self, student: &str, correct: &str) -> bool {
        let Some(numeric) = self.numeric_token.as_ref() else {
            return false;
        };
        let student_nums: Vec<&str> = numeric.find_iter(student).map(|m| m.as_str()).collect();
        let correct_nums: Vec<&str> = numeric.find_iter(correct).map(|m| m.as_str()).collect();

        if student_nums.len() != correct_nums.len() {
            return false;
        }
        student_nums
            .iter()
            .zip(&correct_nums)
            .any(|(a, b)| !numeric_tokens_equal(a, b))
    }
}

fn numeric_tokens_equal(a: &str, b: &str) -> bool {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

/// Overlap of the lowercase character sets, relative to the larger set.
pub fn character_similarity(a: &str, b: &str) -> f64 {
    let a_chars: HashSet<char> = a.to_lowercase().chars().collect();
    let b_chars: HashSet<char> = b.to_lowercase().chars().collect();
    let larger = a_chars.len().max(b_chars.len());
    if larger == 0 {
        return 0.0;
    }
    a_chars.intersection(&b_chars).count() as f64 / larger as f64
}

pub fn looks_like_careless_mistake(student: &str, correct: &str) -> bool {
    if student.is_empty() || correct.is_empty() {
        return false;
    }
    character_similarity(student, correct) > CARELESS_SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incorrect(error_text: &str) -> QuestionOutcome {
        QuestionOutcome {
            id: "q1".to_string(),
            is_correct: false,
            error_text: Some(error_text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_math_calculation_pattern() {
        let classifier = ErrorClassifier::new();
        let tags = classifier.classify(&incorrect("计算错误"), "math");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![ErrorTag::CalculationError]);
    }

    #[test]
    fn test_multiple_groups_match() {
        let classifier = ErrorClassifier::new();
        let tags = classifier.classify(&incorrect("公式用错，并且跳步"), "math");
        assert!(tags.contains(&ErrorTag::FormulaMisuse));
        assert!(tags.contains(&ErrorTag::StepOmission));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_english_text_patterns_are_case_insensitive() {
        let classifier = ErrorClassifier::new();
        let tags = classifier.classify(&incorrect("Wrong TENSE and a Spelling slip"), "english");
        assert!(tags.contains(&ErrorTag::GrammarError));
        assert!(tags.contains(&ErrorTag::SpellingError));
    }

    #[test]
    fn test_physics_uses_quantitative_and_physics_groups() {
        let classifier = ErrorClassifier::new();
        let tags = classifier.classify(&incorrect("单位换算时计算错误，单位不统一"), "physics");
        assert!(tags.contains(&ErrorTag::CalculationError));
        assert!(tags.contains(&ErrorTag::UnitError));
    }

    #[test]
    fn test_subject_scopes_patterns() {
        let classifier = ErrorClassifier::new();
        // grammar commentary on a math question does not match math groups
        let tags = classifier.classify(&incorrect("语法错误"), "math");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![ErrorTag::KnowledgeGap]);
    }

    #[test]
    fn test_numeric_fallback_calculation() {
        let classifier = ErrorClassifier::new();
        let outcome = QuestionOutcome {
            student_answer: Some("x = 12".to_string()),
            correct_answer: Some("x = 15".to_string()),
            ..incorrect("")
        };
        let tags = classifier.classify(&outcome, "math");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![ErrorTag::CalculationError]);
    }

    #[test]
    fn test_similarity_fallback_careless() {
        let classifier = ErrorClassifier::new();
        let outcome = QuestionOutcome {
            student_answer: Some("recieve".to_string()),
            correct_answer: Some("receive".to_string()),
            ..incorrect("")
        };
        let tags = classifier.classify(&outcome, "english");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![ErrorTag::CarelessMistake]);
    }

    #[test]
    fn test_knowledge_gap_when_nothing_matches() {
        let classifier = ErrorClassifier::new();
        let outcome = QuestionOutcome {
            student_answer: Some("apple".to_string()),
            correct_answer: Some("xyz".to_string()),
            ..incorrect("")
        };
        let tags = classifier.classify(&outcome, "english");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![ErrorTag::KnowledgeGap]);
    }

    #[test]
    fn test_correct_outcome_without_text_has_no_tags() {
        let classifier = ErrorClassifier::new();
        let outcome = QuestionOutcome {
            is_correct: true,
            ..Default::default()
        };
        assert!(classifier.classify(&outcome, "math").is_empty());
    }

    #[test]
    fn test_incorrect_outcome_never_empty() {
        let classifier = ErrorClassifier::new();
        for subject in ["math", "physics", "english", "history", ""] {
            for text in ["", "   ", "随便写点", "计算错误", "grammar"] {
                assert!(!classifier.classify(&incorrect(text), subject).is_empty());
            }
        }
    }

    #[test]
    fn test_equal_numbers_are_not_calculation_errors() {
        let classifier = ErrorClassifier::new();
        assert!(!classifier.looks_like_calculation_error("1.0", "1"));
        assert!(!classifier.looks_like_calculation_error("no numbers", "none here"));
        assert!(!classifier.looks_like_calculation_error("3 and 4", "7"));
        assert!(classifier.looks_like_calculation_error("-3", "3"));
    }

    #[test]
    fn test_character_similarity() {
        assert_eq!(character_similarity("abc", "abc"), 1.0);
        assert_eq!(character_similarity("", ""), 0.0);
        assert!((character_similarity("ABCD", "abxy") - 0.5).abs() < 1e-12);
        assert!(!looks_like_careless_mistake("", "abc"));
    }
}
