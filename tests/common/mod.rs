#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use tutor_analytics::store::{KnowledgePointStore, QuestionStore, StoreError};
use tutor_analytics::types::{KnowledgePointProgress, KnowledgePointRecord, QuestionOutcome};
use tutor_analytics::{AnalyticsEngine, InMemoryStore};

pub fn memory_engine() -> (Arc<InMemoryStore>, AnalyticsEngine) {
    let store = Arc::new(InMemoryStore::new());
    let engine = AnalyticsEngine::new(store.clone(), store.clone());
    (store, engine)
}

pub fn outcome(id: &str, is_correct: bool, error_text: Option<&str>, age: Duration) -> QuestionOutcome {
    QuestionOutcome {
        id: id.to_string(),
        is_correct,
        error_text: error_text.map(str::to_string),
        created_at: Utc::now() - age,
        ..Default::default()
    }
}

pub fn at(id: &str, is_correct: bool, created_at: DateTime<Utc>) -> QuestionOutcome {
    QuestionOutcome {
        id: id.to_string(),
        is_correct,
        created_at,
        ..Default::default()
    }
}

/// Store whose every call fails, for error propagation checks.
pub struct FailingStore;

#[async_trait]
impl QuestionStore for FailingStore {
    async fn fetch(
        &self,
        _student_id: &str,
        _subject: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<QuestionOutcome>, StoreError> {
        Err(StoreError::Unavailable("question store offline".to_string()))
    }
}

#[async_trait]
impl KnowledgePointStore for FailingStore {
    async fn get_or_create(
        &self,
        _student_id: &str,
        _knowledge_point_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        Err(StoreError::Unavailable("knowledge point store offline".to_string()))
    }

    async fn save(&self, _row: &KnowledgePointProgress) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("knowledge point store offline".to_string()))
    }

    async fn list_by_subject(
        &self,
        _student_id: &str,
        _subject: &str,
    ) -> Result<Vec<KnowledgePointRecord>, StoreError> {
        Err(StoreError::Unavailable("knowledge point store offline".to_string()))
    }
}

/// In-memory sink for formatted tracing output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
