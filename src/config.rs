use std::path::PathBuf;

use crate::services::{clamp_limit, clamp_window_days};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: PathBuf,
    pub window_days: i64,
    pub recommendation_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let db_path = std::env::var("ANALYTICS_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/analytics.db"));

        let window_days = std::env::var("ANALYTICS_WINDOW_DAYS")
            .ok()
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(clamp_window_days)
            .unwrap_or(DEFAULT_WINDOW_DAYS);

        let recommendation_limit = std::env::var("ANALYTICS_RECOMMENDATION_LIMIT")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .map(clamp_limit)
            .unwrap_or(DEFAULT_RECOMMENDATION_LIMIT);

        Self {
            log_level,
            db_path,
            window_days,
            recommendation_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: PathBuf::from("./data/analytics.db"),
            window_days: DEFAULT_WINDOW_DAYS,
            recommendation_limit: DEFAULT_RECOMMENDATION_LIMIT,
        }
    }
}
