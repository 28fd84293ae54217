use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::algorithm::mastery::{
    learning_velocity, predict_mastery_days, DEFAULT_VELOCITY_WINDOW_DAYS, MASTERY_THRESHOLD,
};
use crate::types::{round_to, QuestionOutcome, TrendDirection};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyErrorRate {
    pub date: NaiveDate,
    pub error_rate: f64,
    pub question_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyErrorSummary {
    pub week: String,
    pub avg_error_rate: f64,
    pub total_questions: usize,
    pub improvement: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTrendAnalysis {
    pub student_id: String,
    pub subject: String,
    pub daily_error_rates: Vec<DailyErrorRate>,
    pub weekly_summaries: Vec<WeeklyErrorSummary>,
    pub overall_trend: TrendDirection,
    pub improvement_rate: f64,
    pub accuracy_velocity: f64,
    pub predicted_mastery_days: Option<u32>,
    pub risk_assessment: RiskLevel,
}

/// Buckets outcomes by UTC day and derives weekly and overall trends.
pub fn summarize_error_trends(
    student_id: &str,
    subject: &str,
    outcomes: &[QuestionOutcome],
) -> ErrorTrendAnalysis {
    let daily = daily_error_rates(outcomes);
    let weekly = weekly_summaries(&daily);
    let overall_trend = overall_trend(&daily);

    let improvement_rate = match (daily.first(), daily.last()) {
        (Some(first), Some(last)) if daily.len() >= 2 => {
            round_to((first.error_rate - last.error_rate) / daily.len() as f64, 4)
        }
        _ => 0.0,
    };

    let accuracy_history: Vec<_> = daily
        .iter()
        .filter_map(|day| {
            let midnight = day.date.and_hms_opt(0, 0, 0)?;
            Some((Utc.from_utc_datetime(&midnight), 1.0 - day.error_rate))
        })
        .collect();
    let accuracy_velocity = learning_velocity(&accuracy_history, DEFAULT_VELOCITY_WINDOW_DAYS);
    let predicted_mastery_days = accuracy_history
        .last()
        .and_then(|(_, accuracy)| predict_mastery_days(*accuracy, MASTERY_THRESHOLD, accuracy_velocity));

    let total_errors: usize = daily.iter().map(|d| d.error_count).sum();
    let total_questions: usize = daily.iter().map(|d| d.question_count).sum();
    let overall_error_rate = if total_questions > 0 {
        total_errors as f64 / total_questions as f64
    } else {
        0.0
    };

    ErrorTrendAnalysis {
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        daily_error_rates: daily,
        weekly_summaries: weekly,
        overall_trend,
        improvement_rate,
        accuracy_velocity: round_to(accuracy_velocity, 4),
        predicted_mastery_days,
        risk_assessment: assess_risk(overall_error_rate, overall_trend),
    }
}

fn daily_error_rates(outcomes: &[QuestionOutcome]) -> Vec<DailyErrorRate> {
    let mut buckets: BTreeMap<NaiveDate, (usize, usize)> = BTreeMap::new();
    for outcome in outcomes {
        let entry = buckets.entry(outcome.created_at.date_naive()).or_insert((0, 0));
        entry.0 += 1;
        if !outcome.is_correct {
            entry.1 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(date, (question_count, error_count))| DailyErrorRate {
            date,
            error_rate: round_to(error_count as f64 / question_count as f64, 3),
            question_count,
            error_count,
        })
        .collect()
}

fn weekly_summaries(daily: &[DailyErrorRate]) -> Vec<WeeklyErrorSummary> {
    let mut weeks: BTreeMap<(i32, u32), Vec<&DailyErrorRate>> = BTreeMap::new();
    for day in daily {
        let iso = day.date.iso_week();
        weeks.entry((iso.year(), iso.week())).or_default().push(day);
    }

    let mut summaries: Vec<WeeklyErrorSummary> = Vec::with_capacity(weeks.len());
    for ((year, week), days) in weeks {
        let avg = days.iter().map(|d| d.error_rate).sum::<f64>() / days.len() as f64;
        let improvement = summaries
            .last()
            .map(|prev| round_to(prev.avg_error_rate - avg, 3))
            .unwrap_or(0.0);
        summaries.push(WeeklyErrorSummary {
            week: format!("{year:04}-W{week:02}"),
            avg_error_rate: round_to(avg, 3),
            total_questions: days.iter().map(|d| d.question_count).sum(),
            improvement,
        });
    }
    summaries
}

fn overall_trend(daily: &[DailyErrorRate]) -> TrendDirection {
    if daily.len() < 2 {
        return TrendDirection::InsufficientData;
    }
    let (early, late) = daily.split_at(daily.len() / 2);
    let mean = |days: &[DailyErrorRate]| days.iter().map(|d| d.error_rate).sum::<f64>() / days.len() as f64;
    let (early, late) = (mean(early), mean(late));

    if late < early * 0.9 {
        TrendDirection::Improving
    } else if late > early * 1.1 {
        TrendDirection::Worsening
    } else {
        TrendDirection::Stable
    }
}

fn assess_risk(error_rate: f64, trend: TrendDirection) -> RiskLevel {
    let worsening = trend == TrendDirection::Worsening;
    if error_rate >= 0.5 || worsening {
        RiskLevel::High
    } else if error_rate < 0.2 {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}
