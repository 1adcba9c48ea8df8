use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};
use serde::Serialize;

use super::{Store, StoreError};
use crate::model::Question;
use crate::quiz::DifficultySpec;

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct QuestionFilter {
    pub subject: Option<String>,
    pub difficulty: DifficultySpec,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QuestionFilter {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject: String,
    pub question_count: i64,
    pub last_updated: DateTime<Utc>,
}

fn decode(body: String) -> Result<Question, StoreError> {
    Ok(serde_json::from_str(&body)?)
}

impl Store {
    /// Inserts a new question. An id that only exists as a deleted row is
    /// revived with the new body; a live id is a conflict.
    pub fn insert_question(&self, question: &Question, now: DateTime<Utc>) -> Result<(), StoreError> {
        let body = serde_json::to_string(question)?;
        let tags = serde_json::to_string(&question.tags)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO questions (id, subject, kind, difficulty, tags, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 subject = excluded.subject,
                 kind = excluded.kind,
                 difficulty = excluded.difficulty,
                 tags = excluded.tags,
                 body = excluded.body,
                 is_deleted = 0,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at
             WHERE questions.is_deleted = 1",
            params![
                question.id,
                question.subject,
                question.kind.as_str(),
                question.difficulty.level(),
                tags,
                body,
                now
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!(
                "question {} already exists",
                question.id
            )));
        }
        Ok(())
    }

    pub fn get_question(&self, id: &str) -> Result<Option<Question>, StoreError> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM questions WHERE id = ?1 AND is_deleted = 0",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(decode).transpose()
    }

    /// Newest first.
    pub fn list_questions(&self, filter: &QuestionFilter) -> Result<Vec<Question>, StoreError> {
        let mut sql = String::from("SELECT body FROM questions WHERE is_deleted = 0");
        let mut args: Vec<Value> = Vec::new();
        if let Some(subject) = &filter.subject {
            args.push(Value::Text(subject.clone()));
            sql.push_str(&format!(" AND subject = ?{}", args.len()));
        }
        if !filter.difficulty.is_any() {
            let mut slots = Vec::new();
            for level in filter.difficulty.levels() {
                args.push(Value::Integer(i64::from(level)));
                slots.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND difficulty IN ({})", slots.join(", ")));
        }
        if let Some(tag) = &filter.tag {
            args.push(Value::Text(tag.clone()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(questions.tags) WHERE json_each.value = ?{})",
                args.len()
            ));
        }
        args.push(Value::Integer(filter.effective_limit() as i64));
        sql.push_str(&format!(" ORDER BY created_at DESC, rowid DESC LIMIT ?{}", args.len()));
        args.push(Value::Integer(filter.offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", args.len()));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let bodies = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.into_iter().map(decode).collect()
    }

    /// Every live question of a subject, the pool quiz selection samples from.
    pub fn questions_for_subject(&self, subject: &str) -> Result<Vec<Question>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM questions WHERE subject = ?1 AND is_deleted = 0 ORDER BY rowid",
        )?;
        let bodies = stmt
            .query_map(params![subject], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.into_iter().map(decode).collect()
    }

    /// Subjects that have at least one live question, alphabetically.
    pub fn subjects(&self) -> Result<Vec<SubjectSummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT subject, COUNT(*), MAX(updated_at) FROM questions
             WHERE is_deleted = 0 GROUP BY subject ORDER BY subject",
        )?;
        let subjects = stmt
            .query_map([], |row| {
                Ok(SubjectSummary {
                    subject: row.get(0)?,
                    question_count: row.get(1)?,
                    last_updated: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subjects)
    }

    /// Replaces a live question's body. Returns false when it is missing or
    /// deleted.
    pub fn update_question(&self, question: &Question, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let body = serde_json::to_string(question)?;
        let tags = serde_json::to_string(&question.tags)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE questions SET subject = ?2, kind = ?3, difficulty = ?4, tags = ?5, body = ?6, updated_at = ?7
             WHERE id = ?1 AND is_deleted = 0",
            params![
                question.id,
                question.subject,
                question.kind.as_str(),
                question.difficulty.level(),
                tags,
                body,
                now
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_question(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE questions SET is_deleted = 1, updated_at = ?2 WHERE id = ?1 AND is_deleted = 0",
            params![id, now],
        )?;
        Ok(changed > 0)
    }
}
