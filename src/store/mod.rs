pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{KnowledgePointProgress, KnowledgePointRecord, QuestionOutcome};

pub use memory::InMemoryStore;
pub use sqlite::{SqliteInitError, SqliteStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Read access to graded questions.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Outcomes of `student_id` in `subject` created within `[from, to]`.
    ///
    /// Order is not significant. No data is an empty list, not an error.
    async fn fetch(
        &self,
        student_id: &str,
        subject: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QuestionOutcome>, StoreError>;
}

/// Persistence of per-student knowledge point counters.
#[async_trait]
pub trait KnowledgePointStore: Send + Sync {
    /// The stored row, or a fresh unsaved row stamped with `now`.
    async fn get_or_create(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        now: DateTime<Utc>,
    ) -> Result<KnowledgePointProgress, StoreError>;

    /// Upserts the whole row in a single write.
    ///
    /// A stored row is only replaced by one whose `total_attempts` is exactly
    /// one higher; anything else is [`StoreError::Conflict`].
    async fn save(&self, row: &KnowledgePointProgress) -> Result<(), StoreError>;

    /// Every stored row of `student_id` whose knowledge point belongs to `subject`.
    async fn list_by_subject(
        &self,
        student_id: &str,
        subject: &str,
    ) -> Result<Vec<KnowledgePointRecord>, StoreError>;
}
