use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{KnowledgePointStore, QuestionStore, StoreError};
use crate::types::{KnowledgePointProgress, KnowledgePointRecord, QuestionOutcome};

#[derive(Debug, Clone)]
struct KnowledgePointMeta {
    name: String,
    subject: String,
}

/// Process-local store backed by hash maps.
#[derive(Default)]
pub struct InMemoryStore {
    questions: RwLock<HashMap<(String, String), Vec<QuestionOutcome>>>,
    knowledge_points: RwLock<HashMap<String, KnowledgePointMeta>>,
    progress: RwLock<HashMap<(String, String), KnowledgePointProgress>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_question(&self, student_id: &str, subject: &str, outcome: QuestionOutcome) {
        self.questions
            .write()
            .entry((student_id.to_string(), subject.to_string()))
            .or_default()
            .push(outcome);
    }

    pub fn register_knowledge_point(&self, id: &str, name: &str, subject: &str) {
        self.knowledge_points.write().insert(
            id.to_string(),
            KnowledgePointMeta {
                name: name.to_string(),
                subject: subject.to_string(),
            },
        );
    }

    pub fn progress(&self, student_id: &str, knowledge_point_id: &str) -> Option<KnowledgePointProgress> {
        self.progress
            .read()
            .get(&(student_id.to_string(), knowledge_point_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl QuestionStore for InMemoryStore {
    async fn fetch(
        &self,
        student_id: &str,
        subject: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QuestionOutcome>, StoreError> {
        let questions = self.questions.read();
        Ok(questions
            .get(&(student_id.to_string(), subject.to_string()))
            .map(|items| {
                items
                    .iter()
                    .filter(|q| q.created_at >= from && q.created_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl KnowledgePointStore for InMemoryStore {
    async fn get_or_create(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        now: DateTime<Utc>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        Ok(self
            .progress(student_id, knowledge_point_id)
            .unwrap_or_else(|| KnowledgePointProgress::new(student_id, knowledge_point_id, now)))
    }

    async fn save(&self, row: &KnowledgePointProgress) -> Result<(), StoreError> {
        let mut progress = self.progress.write();
        let key = (row.student_id.clone(), row.knowledge_point_id.clone());
        if let Some(stored) = progress.get(&key) {
            if row.total_attempts != stored.total_attempts.saturating_add(1) {
                return Err(StoreError::Conflict(format!(
                    "stale progress row for student {} knowledge point {}",
                    row.student_id, row.knowledge_point_id
                )));
            }
        }
        progress.insert(key, row.clone());
        Ok(())
    }

    async fn list_by_subject(
        &self,
        student_id: &str,
        subject: &str,
    ) -> Result<Vec<KnowledgePointRecord>, StoreError> {
        let meta = self.knowledge_points.read();
        let progress = self.progress.read();

        let mut records: Vec<KnowledgePointRecord> = progress
            .values()
            .filter(|row| row.student_id == student_id)
            .filter_map(|row| {
                let kp = meta.get(&row.knowledge_point_id)?;
                (kp.subject == subject).then(|| KnowledgePointRecord {
                    name: kp.name.clone(),
                    progress: row.clone(),
                })
            })
            .collect();
        records.sort_by(|a, b| a.progress.knowledge_point_id.cmp(&b.progress.knowledge_point_id));
        Ok(records)
    }
}
