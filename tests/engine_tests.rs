mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use common::{memory_engine, outcome, CapturedLogs, FailingStore};
use tutor_analytics::services::RecommendationPriority;
use tutor_analytics::store::StoreError;
use tutor_analytics::types::{ErrorFrequency, ErrorTag, QuestionOutcome, TrendDirection};
use tutor_analytics::AnalyticsEngine;

#[tokio::test]
async fn analyze_without_data_returns_zero_analysis() {
    let (_store, engine) = memory_engine();
    let analysis = engine.analyze("s1", "math", 30).await.unwrap();

    assert_eq!(analysis.total_questions, 0);
    assert_eq!(analysis.error_rate, 0.0);
    assert!(analysis.systematic_errors.is_empty());
    assert!(analysis.recommendations.is_empty());
}

#[tokio::test]
async fn analyze_end_to_end_scenario() {
    let (store, engine) = memory_engine();
    store.insert_question("s1", "math", outcome("q1", true, None, Duration::days(3)));
    store.insert_question("s1", "math", outcome("q2", false, Some("计算错误"), Duration::days(2)));
    store.insert_question("s1", "math", outcome("q3", true, None, Duration::days(1)));

    let analysis = engine.analyze("s1", "math", 30).await.unwrap();
    assert_eq!(analysis.total_questions, 3);
    assert_eq!(analysis.total_errors, 1);
    assert_eq!(analysis.error_rate, 0.333);
    assert_eq!(
        serde_json::to_value(&analysis.error_type_distribution).unwrap(),
        json!({ "calculation_error": 1 })
    );
    assert!(analysis.systematic_errors.is_empty());

    let indicators = analysis.progress_indicators.unwrap();
    assert_eq!(indicators.total_practice_count, 3);
    assert_eq!(indicators.improvement_trend, TrendDirection::Stable);
}

#[tokio::test]
async fn analyze_ignores_outcomes_outside_window() {
    let (store, engine) = memory_engine();
    store.insert_question("s1", "math", outcome("old", false, Some("计算错误"), Duration::days(60)));
    store.insert_question("s1", "math", outcome("new", true, None, Duration::days(1)));

    let analysis = engine.analyze("s1", "math", 30).await.unwrap();
    assert_eq!(analysis.total_questions, 1);
    assert_eq!(analysis.total_errors, 0);
}

#[tokio::test]
async fn systematic_calculation_errors_are_detected() {
    let (store, engine) = memory_engine();
    for i in 0..10 {
        store.insert_question(
            "s1",
            "math",
            outcome(&format!("q{i}"), false, Some("计算错误"), Duration::hours(i + 1)),
        );
    }

    let analysis = engine.analyze("s1", "math", 30).await.unwrap();
    assert_eq!(analysis.systematic_errors.len(), 1);
    let systematic = &analysis.systematic_errors[0];
    assert_eq!(systematic.error_type, ErrorTag::CalculationError);
    assert_eq!(systematic.frequency_band, ErrorFrequency::Systematic);
    assert_eq!(systematic.occurrence_count, 10);
    assert_eq!(systematic.total_opportunities, 10);
    assert_eq!(analysis.recommendations[0].priority, 5);
    assert_eq!(analysis.recommendations[0].estimated_time.as_deref(), Some("2-3周"));
}

#[tokio::test]
async fn two_questions_never_produce_systematic_errors() {
    let (store, engine) = memory_engine();
    store.insert_question("s1", "math", outcome("q1", true, None, Duration::hours(2)));
    store.insert_question("s1", "math", outcome("q2", false, Some("计算错误"), Duration::hours(1)));

    let analysis = engine.analyze("s1", "math", 30).await.unwrap();
    assert!(analysis.systematic_errors.is_empty());
}

#[tokio::test]
async fn two_correct_updates_keep_mastery_unset() {
    let (store, engine) = memory_engine();
    engine.update_knowledge_point_progress("s1", "kp1", true, None).await.unwrap();
    let row = engine.update_knowledge_point_progress("s1", "kp1", true, None).await.unwrap();

    assert_eq!(row.total_attempts, 2);
    assert_eq!(row.correct_attempts, 2);
    assert_eq!(row.accuracy_rate, 1.0);
    assert_eq!(row.mastery_level, 0.0);
    assert_eq!(store.progress("s1", "kp1"), Some(row));

    let row = engine.update_knowledge_point_progress("s1", "kp1", true, Some(0.8)).await.unwrap();
    assert!(row.mastery_level >= 0.75);
    assert!(row.mastery_achieved_at.is_some());
    assert_eq!(row.confidence_score, Some(0.8));
}

#[tokio::test]
async fn concurrent_updates_on_same_key_are_not_lost() {
    let (store, engine) = memory_engine();

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .update_knowledge_point_progress("s1", "kp1", i % 2 == 0, None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let row = store.progress("s1", "kp1").unwrap();
    assert_eq!(row.total_attempts, 32);
    assert_eq!(row.correct_attempts, 16);
    assert_eq!(row.accuracy_rate, 0.5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engines_sharing_a_store_reject_instead_of_losing_updates() {
    let (store, first) = memory_engine();
    let second = AnalyticsEngine::new(store.clone(), store.clone());

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = if i % 2 == 0 { first.clone() } else { second.clone() };
        handles.push(tokio::spawn(async move {
            engine.update_knowledge_point_progress("s1", "kp1", false, None).await
        }));
    }

    let mut acknowledged = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => acknowledged += 1,
            Err(err) => assert!(matches!(err, StoreError::Conflict(_))),
        }
    }

    let row = store.progress("s1", "kp1").unwrap();
    assert_eq!(row.total_attempts, acknowledged);
}

#[tokio::test]
async fn record_question_outcome_tracks_common_errors() {
    let (store, engine) = memory_engine();
    let graded = QuestionOutcome {
        id: "q1".to_string(),
        is_correct: false,
        error_text: Some("计算错误".to_string()),
        knowledge_point_ids: vec!["kp1".to_string(), "kp2".to_string(), "kp1".to_string()],
        created_at: Utc::now(),
        ..Default::default()
    };

    let rows = engine.record_question_outcome("s1", "math", &graded).await.unwrap();
    assert_eq!(rows.len(), 2);
    for kp in ["kp1", "kp2"] {
        let row = store.progress("s1", kp).unwrap();
        assert_eq!(row.total_attempts, 1);
        assert_eq!(row.correct_attempts, 0);
        assert_eq!(row.common_errors[&ErrorTag::CalculationError], 1);
    }
}

#[tokio::test]
async fn recommendations_follow_weak_knowledge_points() {
    let (store, engine) = memory_engine();
    store.register_knowledge_point("kp1", "分数运算", "math");
    store.register_knowledge_point("kp2", "一元一次方程", "math");

    let wrong = QuestionOutcome {
        is_correct: false,
        error_text: Some("计算错误".to_string()),
        knowledge_point_ids: vec!["kp1".to_string()],
        created_at: Utc::now(),
        ..Default::default()
    };
    for _ in 0..3 {
        engine.record_question_outcome("s1", "math", &wrong).await.unwrap();
    }
    for _ in 0..3 {
        engine.update_knowledge_point_progress("s1", "kp2", true, None).await.unwrap();
    }

    let recommendations = engine.learning_recommendations("s1", "math", 5).await.unwrap();
    assert_eq!(recommendations.len(), 1);
    let first = &recommendations[0];
    assert_eq!(first.knowledge_point_name, "分数运算");
    assert_eq!(first.priority, RecommendationPriority::High);
    assert_eq!(first.estimated_practice_minutes, 90);
    assert!(first.strategies.iter().any(|s| s.contains("验算")));

    let progress = engine.compute_subject_progress("s1", "math", 30).await.unwrap();
    assert_eq!(progress.weak_knowledge_points, vec!["分数运算"]);
}

#[tokio::test]
async fn learning_patterns_cover_requested_subjects() {
    let (store, engine) = memory_engine();
    store.insert_question("s1", "math", outcome("q1", true, None, Duration::days(2)));
    store.insert_question("s1", "english", outcome("q2", false, None, Duration::days(1)));

    let summary = engine
        .learning_patterns("s1", &["math".to_string(), "english".to_string()], 30)
        .await
        .unwrap();
    assert_eq!(summary.subject_preferences.len(), 2);
    assert_eq!(summary.subject_preferences[0].performance, 1.0);
    assert_eq!(summary.subject_preferences[1].performance, 0.0);
    assert!(summary.best_learning_hour.is_some());
}

#[tokio::test]
async fn store_failures_propagate_unchanged() {
    let failing = Arc::new(FailingStore);
    let engine = AnalyticsEngine::new(failing.clone(), failing);

    assert!(matches!(
        engine.analyze("s1", "math", 30).await,
        Err(StoreError::Unavailable(_))
    ));
    assert!(matches!(
        engine.compute_subject_progress("s1", "math", 30).await,
        Err(StoreError::Unavailable(_))
    ));
    assert!(matches!(
        engine.update_knowledge_point_progress("s1", "kp1", true, None).await,
        Err(StoreError::Unavailable(_))
    ));
    assert!(matches!(
        engine.learning_recommendations("s1", "math", 5).await,
        Err(StoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn every_failed_store_call_is_logged() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let failing = Arc::new(FailingStore);
    let engine = AnalyticsEngine::new(failing.clone(), failing);

    assert!(engine.error_trends("s1", "math", 30).await.is_err());
    assert!(engine.learning_trends("s1", "math", 30).await.is_err());
    assert!(engine.learning_patterns("s1", &["math".to_string()], 30).await.is_err());
    assert!(engine.learning_recommendations("s1", "math", 5).await.is_err());
    assert!(engine.update_knowledge_point_progress("s1", "kp1", true, None).await.is_err());
    assert!(engine.compute_subject_progress("s1", "math", 30).await.is_err());

    let output = logs.contents();
    assert_eq!(output.matches("store call failed").count(), 6);
    assert!(output.contains("list knowledge points"));
    assert!(output.contains("load knowledge point progress"));
    assert!(output.contains("fetch question outcomes"));
}
