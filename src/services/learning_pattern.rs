use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::Serialize;

use crate::types::{round_to, QuestionOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPreference {
    pub subject: String,
    pub engagement_level: usize,
    pub performance: f64,
    pub avg_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPatternSummary {
    pub student_id: String,
    pub daily_activity: Vec<DailyActivity>,
    pub total_study_days: usize,
    pub avg_daily_sessions: f64,
    pub learning_consistency: f64,
    pub best_learning_hour: Option<u32>,
    pub subject_preferences: Vec<SubjectPreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SessionKey {
    Explicit(String),
    Implicit { subject: String, date: NaiveDate },
}

/// Study habits across subjects. Outcomes without a session id are grouped
/// into one session per subject and day.
pub fn summarize_learning_patterns(
    student_id: &str,
    per_subject: &[(String, Vec<QuestionOutcome>)],
) -> LearningPatternSummary {
    let mut session_starts: HashMap<SessionKey, DateTime<Utc>> = HashMap::new();
    for (subject, outcomes) in per_subject {
        for outcome in outcomes {
            let key = match outcome.session_id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => SessionKey::Explicit(id.to_string()),
                _ => SessionKey::Implicit {
                    subject: subject.clone(),
                    date: outcome.created_at.date_naive(),
                },
            };
            session_starts
                .entry(key)
                .and_modify(|start| *start = (*start).min(outcome.created_at))
                .or_insert(outcome.created_at);
        }
    }

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    let mut per_hour: BTreeMap<u32, usize> = BTreeMap::new();
    for start in session_starts.values() {
        *per_day.entry(start.date_naive()).or_insert(0) += 1;
        *per_hour.entry(start.hour()).or_insert(0) += 1;
    }

    let daily_activity: Vec<DailyActivity> = per_day
        .into_iter()
        .map(|(date, sessions)| DailyActivity { date, sessions })
        .collect();
    let counts: Vec<f64> = daily_activity.iter().map(|d| d.sessions as f64).collect();
    let avg_daily_sessions = mean(&counts);

    // hours ascend, so ties keep the earliest hour
    let best_learning_hour = per_hour
        .iter()
        .fold(None::<(u32, usize)>, |best, (&hour, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((hour, count)),
        })
        .map(|(hour, _)| hour);

    LearningPatternSummary {
        student_id: student_id.to_string(),
        total_study_days: daily_activity.len(),
        daily_activity,
        avg_daily_sessions: round_to(avg_daily_sessions, 2),
        learning_consistency: round_to(consistency(&counts), 3),
        best_learning_hour,
        subject_preferences: per_subject
            .iter()
            .map(|(subject, outcomes)| subject_preference(subject, outcomes))
            .collect(),
    }
}

fn subject_preference(subject: &str, outcomes: &[QuestionOutcome]) -> SubjectPreference {
    let total = outcomes.len();
    let correct = outcomes.iter().filter(|q| q.is_correct).count();
    let scores: Vec<f64> = outcomes.iter().filter_map(QuestionOutcome::normalized_score).collect();

    SubjectPreference {
        subject: subject.to_string(),
        engagement_level: total,
        performance: if total > 0 {
            round_to(correct as f64 / total as f64, 3)
        } else {
            0.0
        },
        avg_score: round_to(mean(&scores), 3),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// `1 - stdev/mean` of daily session counts, floored at zero.
fn consistency(counts: &[f64]) -> f64 {
    if counts.len() < 2 {
        return 0.0;
    }
    let avg = mean(counts);
    if avg <= 0.0 {
        return 0.0;
    }
    let variance = counts.iter().map(|c| (c - avg).powi(2)).sum::<f64>() / (counts.len() - 1) as f64;
    (1.0 - variance.sqrt() / avg).max(0.0)
}
