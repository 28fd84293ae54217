pub mod algorithm;
pub mod config;
pub mod engine;
pub mod locks;
pub mod logging;
pub mod services;
pub mod store;
pub mod types;

pub use engine::AnalyticsEngine;
pub use store::{InMemoryStore, KnowledgePointStore, QuestionStore, SqliteStore, StoreError};
