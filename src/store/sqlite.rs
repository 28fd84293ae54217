use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{KnowledgePointStore, QuestionStore, StoreError};
use crate::types::{ErrorTag, KnowledgePointProgress, KnowledgePointRecord, QuestionOutcome};

pub const SQLITE_SCHEMA_SQL: &str = include_str!("../../sql/sqlite_schema.sql");
const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum SqliteInitError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database file and applies the schema.
    pub async fn open(db_path: &Path) -> Result<Self, SqliteInitError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SqliteInitError::Io(e.to_string()))?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| SqliteInitError::Config(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, SqliteInitError> {
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Appends a graded question. An empty id is replaced by a generated one.
    pub async fn insert_question(
        &self,
        student_id: &str,
        subject: &str,
        outcome: &QuestionOutcome,
    ) -> Result<String, StoreError> {
        let id = if outcome.id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            outcome.id.clone()
        };
        let knowledge_point_ids = serde_json::to_string(&outcome.knowledge_point_ids)?;

        sqlx::query(
            r#"
            INSERT INTO "question_outcomes"
              ("id","studentId","subject","sessionId","isCorrect","score","maxScore","difficultyLevel",
               "errorText","studentAnswer","correctAnswer","knowledgePointIds","createdAt")
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(&id)
        .bind(student_id)
        .bind(subject)
        .bind(outcome.session_id.as_deref())
        .bind(outcome.is_correct)
        .bind(outcome.score)
        .bind(outcome.max_score)
        .bind(outcome.difficulty_level.map(i64::from))
        .bind(outcome.error_text.as_deref())
        .bind(outcome.student_answer.as_deref())
        .bind(outcome.correct_answer.as_deref())
        .bind(knowledge_point_ids)
        .bind(outcome.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn upsert_knowledge_point(&self, id: &str, name: &str, subject: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "knowledge_points" ("id","name","subject") VALUES (?,?,?)
            ON CONFLICT ("id") DO UPDATE SET "name" = excluded."name", "subject" = excluded."subject"
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(subject)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QuestionStore for SqliteStore {
    async fn fetch(
        &self,
        student_id: &str,
        subject: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<QuestionOutcome>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "id","sessionId","isCorrect","score","maxScore","difficultyLevel",
                   "errorText","studentAnswer","correctAnswer","knowledgePointIds","createdAt"
            FROM "question_outcomes"
            WHERE "studentId" = ?
              AND "subject" = ?
              AND "createdAt" >= ?
              AND "createdAt" <= ?
            ORDER BY "createdAt" ASC
            "#,
        )
        .bind(student_id)
        .bind(subject)
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_question_row).collect()
    }
}

#[async_trait]
impl KnowledgePointStore for SqliteStore {
    async fn get_or_create(
        &self,
        student_id: &str,
        knowledge_point_id: &str,
        now: DateTime<Utc>,
    ) -> Result<KnowledgePointProgress, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT "studentId","knowledgePointId","totalAttempts","correctAttempts","accuracyRate",
                   "masteryLevel","confidenceScore","commonErrors","firstLearnedAt","lastPracticedAt",
                   "masteryAchievedAt"
            FROM "knowledge_point_progress"
            WHERE "studentId" = ? AND "knowledgePointId" = ?
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(knowledge_point_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => map_progress_row(&row),
            None => Ok(KnowledgePointProgress::new(student_id, knowledge_point_id, now)),
        }
    }

    async fn save(&self, row: &KnowledgePointProgress) -> Result<(), StoreError> {
        let common_errors: BTreeMap<&str, u32> =
            row.common_errors.iter().map(|(tag, count)| (tag.as_str(), *count)).collect();
        let common_errors = serde_json::to_string(&common_errors)?;
        let now = Utc::now().timestamp_millis();

        // an existing row only accepts exactly one more attempt; masteryAchievedAt is write-once
        let result = sqlx::query(
            r#"
            INSERT INTO "knowledge_point_progress"
              ("studentId","knowledgePointId","totalAttempts","correctAttempts","accuracyRate",
               "masteryLevel","confidenceScore","commonErrors","firstLearnedAt","lastPracticedAt",
               "masteryAchievedAt","updatedAt")
            VALUES (?,?,?,?,?,?,?,?,?,?,?,?)
            ON CONFLICT ("studentId","knowledgePointId") DO UPDATE SET
              "totalAttempts" = excluded."totalAttempts",
              "correctAttempts" = excluded."correctAttempts",
              "accuracyRate" = excluded."accuracyRate",
              "masteryLevel" = excluded."masteryLevel",
              "confidenceScore" = excluded."confidenceScore",
              "commonErrors" = excluded."commonErrors",
              "lastPracticedAt" = excluded."lastPracticedAt",
              "masteryAchievedAt" = COALESCE("knowledge_point_progress"."masteryAchievedAt", excluded."masteryAchievedAt"),
              "updatedAt" = excluded."updatedAt"
            WHERE excluded."totalAttempts" = "knowledge_point_progress"."totalAttempts" + 1
            "#,
        )
        .bind(&row.student_id)
        .bind(&row.knowledge_point_id)
        .bind(i64::from(row.total_attempts))
        .bind(i64::from(row.correct_attempts.min(row.total_attempts)))
        .bind(row.accuracy_rate)
        .bind(row.mastery_level)
        .bind(row.confidence_score)
        .bind(common_errors)
        .bind(row.first_learned_at.timestamp_millis())
        .bind(row.last_practiced_at.timestamp_millis())
        .bind(row.mastery_achieved_at.map(|ts| ts.timestamp_millis()))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "stale progress row for student {} knowledge point {}",
                row.student_id, row.knowledge_point_id
            )));
        }
        Ok(())
    }

    async fn list_by_subject(
        &self,
        student_id: &str,
        subject: &str,
    ) -> Result<Vec<KnowledgePointRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p."studentId",p."knowledgePointId",p."totalAttempts",p."correctAttempts",p."accuracyRate",
                   p."masteryLevel",p."confidenceScore",p."commonErrors",p."firstLearnedAt",p."lastPracticedAt",
                   p."masteryAchievedAt",k."name"
            FROM "knowledge_point_progress" p
            JOIN "knowledge_points" k ON k."id" = p."knowledgePointId"
            WHERE p."studentId" = ? AND k."subject" = ?
            ORDER BY p."knowledgePointId" ASC
            "#,
        )
        .bind(student_id)
        .bind(subject)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<KnowledgePointRecord, StoreError> {
                Ok(KnowledgePointRecord {
                    name: row.try_get("name")?,
                    progress: map_progress_row(row)?,
                })
            })
            .collect()
    }
}

pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    if version.as_deref() == Some(SCHEMA_VERSION) {
        return Ok(());
    }

    tracing::info!(version = SCHEMA_VERSION, "applying analytics schema");

    for stmt in split_sql_statements(SQLITE_SCHEMA_SQL) {
        let sql: String = stmt
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#)
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn map_question_row(row: &SqliteRow) -> Result<QuestionOutcome, StoreError> {
    let knowledge_point_ids: String = row.try_get("knowledgePointIds")?;
    let difficulty_level: Option<i64> = row.try_get("difficultyLevel")?;

    Ok(QuestionOutcome {
        id: row.try_get("id")?,
        session_id: row.try_get("sessionId")?,
        is_correct: row.try_get("isCorrect")?,
        score: row.try_get("score")?,
        max_score: row.try_get("maxScore")?,
        difficulty_level: difficulty_level.map(|v| v.clamp(1, 5) as u8),
        error_text: row.try_get("errorText")?,
        student_answer: row.try_get("studentAnswer")?,
        correct_answer: row.try_get("correctAnswer")?,
        knowledge_point_ids: serde_json::from_str(&knowledge_point_ids)?,
        created_at: from_millis(row.try_get("createdAt")?),
    })
}

fn map_progress_row(row: &SqliteRow) -> Result<KnowledgePointProgress, StoreError> {
    let raw_errors: String = row.try_get("commonErrors")?;
    let raw_errors: BTreeMap<String, u32> = serde_json::from_str(&raw_errors)?;
    let common_errors = raw_errors
        .into_iter()
        .filter_map(|(key, count)| ErrorTag::parse(&key).map(|tag| (tag, count)))
        .collect();
    let mastery_achieved_at: Option<i64> = row.try_get("masteryAchievedAt")?;

    let mut progress = KnowledgePointProgress {
        student_id: row.try_get("studentId")?,
        knowledge_point_id: row.try_get("knowledgePointId")?,
        total_attempts: to_count(row.try_get("totalAttempts")?),
        correct_attempts: to_count(row.try_get("correctAttempts")?),
        accuracy_rate: row.try_get("accuracyRate")?,
        mastery_level: row.try_get("masteryLevel")?,
        confidence_score: row.try_get("confidenceScore")?,
        common_errors,
        first_learned_at: from_millis(row.try_get("firstLearnedAt")?),
        last_practiced_at: from_millis(row.try_get("lastPracticedAt")?),
        mastery_achieved_at: mastery_achieved_at.map(from_millis),
    };
    progress.recompute_accuracy();
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sql_statements_respects_quotes() {
        let sql = r#"CREATE TABLE "a;b" ("x" TEXT DEFAULT ';'); INSERT INTO t VALUES ('1'); "#;
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
    }

    #[test]
    fn test_schema_splits_into_statements() {
        let statements = split_sql_statements(SQLITE_SCHEMA_SQL);
        assert_eq!(statements.len(), 5);
    }

    #[test]
    fn test_to_count_clamps() {
        assert_eq!(to_count(-3), 0);
        assert_eq!(to_count(7), 7);
    }
}
