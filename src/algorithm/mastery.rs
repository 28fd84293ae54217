//! Mastery statistics
//!
//! Stateless functions shared by every analytics service:
//! - weighted mastery rate (recent vs historical accuracy, with decay)
//! - weak knowledge point selection
//! - learning velocity (least-squares slope over a time series)
//! - days-to-mastery prediction
//!
//! Weights and thresholds are fixed constants so that results are
//! reproducible for a given input.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Weight of the recent-window accuracy in the blended mastery rate.
pub const RECENT_WEIGHT: f64 = 0.6;
/// Weight of the lifetime accuracy in the blended mastery rate.
pub const HISTORICAL_WEIGHT: f64 = 0.4;
pub const TIME_DECAY_FACTOR: f64 = 0.95;
/// Mastery level at which a knowledge point counts as mastered.
pub const MASTERY_THRESHOLD: f64 = 0.75;
/// Attempts needed before a mastery estimate is trusted.
pub const MIN_ATTEMPTS_FOR_CONFIDENCE: i64 = 3;
pub const WEAK_POINT_THRESHOLD: f64 = 0.6;
pub const DEFAULT_VELOCITY_WINDOW_DAYS: i64 = 14;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Blended mastery rate using the fixed decay factor.
pub fn mastery_rate(correct: i64, total: i64, recent_accuracy: f64) -> f64 {
    mastery_rate_with_decay(correct, total, recent_accuracy, TIME_DECAY_FACTOR)
}

pub fn mastery_rate_with_decay(correct: i64, total: i64, recent_accuracy: f64, decay: f64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let correct = correct.clamp(0, total);
    let recent = sanitize_unit(recent_accuracy);
    let decay = sanitize_unit(decay);

    let historical = correct as f64 / total as f64;
    let raw = recent * RECENT_WEIGHT + historical * HISTORICAL_WEIGHT;
    (raw * decay).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeakPointCandidate {
    pub name: String,
    pub mastery_level: f64,
    pub total_attempts: i64,
}

/// Names of candidates below `threshold` with enough attempts, in input order.
pub fn identify_weak_points(records: &[WeakPointCandidate], threshold: f64) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.mastery_level < threshold && r.total_attempts >= MIN_ATTEMPTS_FOR_CONFIDENCE)
        .map(|r| r.name.clone())
        .collect()
}

/// Per-day rate of change of `rate` over the last `window_days`.
///
/// The window is anchored at the latest timestamp in `history`, not the wall
/// clock. With fewer than two points inside the window the last two points
/// overall are used.
pub fn learning_velocity(history: &[(DateTime<Utc>, f64)], window_days: i64) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let mut sorted: Vec<(DateTime<Utc>, f64)> = history
        .iter()
        .map(|(ts, rate)| (*ts, if rate.is_finite() { *rate } else { 0.0 }))
        .collect();
    sorted.sort_by_key(|(ts, _)| *ts);

    let Some(&(latest, _)) = sorted.last() else {
        return 0.0;
    };
    let cutoff = latest - Duration::days(window_days.max(0));
    let mut recent: Vec<(DateTime<Utc>, f64)> =
        sorted.iter().copied().filter(|(ts, _)| *ts >= cutoff).collect();
    if recent.len() < 2 {
        recent = sorted[sorted.len() - 2..].to_vec();
    }

    let origin = recent[0].0;
    let xs: Vec<f64> = recent
        .iter()
        .map(|(ts, _)| (*ts - origin).num_milliseconds() as f64 / MS_PER_DAY)
        .collect();
    let ys: Vec<f64> = recent.iter().map(|(_, rate)| *rate).collect();

    if xs.iter().all(|x| *x == xs[0]) {
        return 0.0;
    }

    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let numerator: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

    if denominator == 0.0 {
        return 0.0;
    }
    numerator / denominator
}

/// Days until `current` reaches `target` at a constant `velocity`.
///
/// `None` when there is nothing to predict: no progress per day, or the
/// target is already reached.
pub fn predict_mastery_days(current: f64, target: f64, velocity: f64) -> Option<u32> {
    if !(velocity > 0.0) || !current.is_finite() || !target.is_finite() || current >= target {
        return None;
    }
    // 1e-9 absorbs binary rounding, e.g. 0.4 / 0.02 landing just above 20
    let days = ((target - current) / velocity - 1e-9).ceil().max(1.0);
    Some(days.min(u32::MAX as f64) as u32)
}

fn sanitize_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::days(offset)
    }

    fn candidate(name: &str, mastery_level: f64, total_attempts: i64) -> WeakPointCandidate {
        WeakPointCandidate {
            name: name.to_string(),
            mastery_level,
            total_attempts,
        }
    }

    #[test]
    fn test_mastery_rate_zero_total() {
        assert_eq!(mastery_rate(0, 0, 1.0), 0.0);
        assert_eq!(mastery_rate(5, 0, 0.9), 0.0);
        assert_eq!(mastery_rate(3, -2, 0.9), 0.0);
    }

    #[test]
    fn test_mastery_rate_blend() {
        // (0.8 * 0.6 + 0.5 * 0.4) * 0.95
        let rate = mastery_rate(5, 10, 0.8);
        assert!((rate - 0.646).abs() < 1e-9);
    }

    #[test]
    fn test_mastery_rate_perfect_is_decayed() {
        let rate = mastery_rate(10, 10, 1.0);
        assert!((rate - TIME_DECAY_FACTOR).abs() < 1e-12);
    }

    #[test]
    fn test_mastery_rate_clamps_invalid_inputs() {
        assert!((mastery_rate(20, 10, 1.0) - mastery_rate(10, 10, 1.0)).abs() < 1e-12);
        assert_eq!(mastery_rate(-4, 10, -3.0), 0.0);
        assert_eq!(mastery_rate(0, 10, f64::NAN), 0.0);
        assert!(mastery_rate(10, 10, 7.0) <= 1.0);
    }

    #[test]
    fn test_identify_weak_points_filters_and_preserves_order() {
        let records = vec![
            candidate("fractions", 0.3, 5),
            candidate("decimals", 0.9, 8),
            candidate("angles", 0.2, 2),
            candidate("equations", 0.55, 3),
        ];
        let weak = identify_weak_points(&records, WEAK_POINT_THRESHOLD);
        assert_eq!(weak, vec!["fractions".to_string(), "equations".to_string()]);
        assert_eq!(identify_weak_points(&records, WEAK_POINT_THRESHOLD), weak);
    }

    #[test]
    fn test_velocity_needs_two_points() {
        assert_eq!(learning_velocity(&[], DEFAULT_VELOCITY_WINDOW_DAYS), 0.0);
        assert_eq!(learning_velocity(&[(day(0), 0.4)], DEFAULT_VELOCITY_WINDOW_DAYS), 0.0);
    }

    #[test]
    fn test_velocity_linear_series() {
        let history = vec![(day(14), 0.7), (day(0), 0.3), (day(7), 0.5)];
        let velocity = learning_velocity(&history, DEFAULT_VELOCITY_WINDOW_DAYS);
        assert!(velocity > 0.0);
        assert!((velocity - 0.0286).abs() < 0.005);
    }

    #[test]
    fn test_velocity_falls_back_to_last_two_points() {
        // only the latest point is inside the window
        let history = vec![(day(0), 0.2), (day(30), 0.5), (day(60), 0.8)];
        let velocity = learning_velocity(&history, 14);
        assert!((velocity - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_identical_timestamps() {
        let history = vec![(day(3), 0.2), (day(3), 0.9)];
        assert_eq!(learning_velocity(&history, 14), 0.0);
    }

    #[test]
    fn test_velocity_negative_trend() {
        let history = vec![(day(0), 0.9), (day(5), 0.6), (day(10), 0.3)];
        assert!(learning_velocity(&history, 14) < 0.0);
    }

    #[test]
    fn test_predict_mastery_days() {
        assert_eq!(predict_mastery_days(0.4, 0.8, 0.02), Some(20));
        assert_eq!(predict_mastery_days(0.9, 0.8, 0.5), None);
        assert_eq!(predict_mastery_days(0.8, 0.8, 0.5), None);
        assert_eq!(predict_mastery_days(0.2, 0.8, 0.0), None);
        assert_eq!(predict_mastery_days(0.2, 0.8, -0.1), None);
        assert_eq!(predict_mastery_days(0.2, 0.8, f64::NAN), None);
    }

    #[test]
    fn test_predict_mastery_days_rounds_up_and_floors_at_one() {
        assert_eq!(predict_mastery_days(0.5, 0.75, 0.1), Some(3));
        assert_eq!(predict_mastery_days(0.74, 0.75, 0.5), Some(1));
    }
}
