use std::process::ExitCode;
use std::sync::Arc;

use serde::Serialize;

use tutor_analytics::config::Config;
use tutor_analytics::logging::{self, LogSettings};
use tutor_analytics::services::{clamp_window_days, ErrorPatternAnalysis, KnowledgePointRecommendation, SubjectProgress};
use tutor_analytics::{AnalyticsEngine, SqliteStore, StoreError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    student_id: String,
    subject: String,
    window_days: i64,
    error_analysis: ErrorPatternAnalysis,
    subject_progress: SubjectProgress,
    recommendations: Vec<KnowledgePointRecommendation>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&LogSettings::from_env(&config.log_level));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (student_id, subject, window_days) = match parse_args(&args, config.window_days) {
        Some(parsed) => parsed,
        None => {
            eprintln!("usage: analytics-report <student_id> <subject> [window_days]");
            return ExitCode::from(2);
        }
    };

    let store = match SqliteStore::open(&config.db_path).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::error!(error = %err, path = %config.db_path.display(), "failed to open analytics database");
            return ExitCode::from(1);
        }
    };

    let engine = AnalyticsEngine::new(store.clone(), store);
    match build_report(&engine, &config, &student_id, &subject, window_days).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize report");
                ExitCode::from(1)
            }
        },
        Err(err) => {
            tracing::error!(error = %err, student_id = %student_id, subject = %subject, "report generation failed");
            ExitCode::from(1)
        }
    }
}

fn parse_args(args: &[String], default_window: i64) -> Option<(String, String, i64)> {
    match args {
        [student, subject] => Some((student.clone(), subject.clone(), default_window)),
        [student, subject, days] => {
            let days = days.trim().parse::<i64>().ok()?;
            Some((student.clone(), subject.clone(), clamp_window_days(days)))
        }
        _ => None,
    }
}

async fn build_report(
    engine: &AnalyticsEngine,
    config: &Config,
    student_id: &str,
    subject: &str,
    window_days: i64,
) -> Result<Report, StoreError> {
    let error_analysis = engine.analyze(student_id, subject, window_days).await?;
    let subject_progress = engine
        .compute_subject_progress(student_id, subject, window_days)
        .await?;
    let recommendations = engine
        .learning_recommendations(student_id, subject, config.recommendation_limit)
        .await?;

    Ok(Report {
        student_id: student_id.to_string(),
        subject: subject.to_string(),
        window_days,
        error_analysis,
        subject_progress,
        recommendations,
    })
}
