use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::model::percentage;

/// Longest session duration the store accepts, in seconds.
pub const MAX_SESSION_SECS: i64 = 24 * 60 * 60;
/// Most questions one session may report.
pub const MAX_SESSION_QUESTIONS: i64 = 10_000;

pub(super) fn check_session_counters(
    total: i64,
    correct: i64,
    duration_secs: i64,
) -> Result<(), StoreError> {
    if !(0..=MAX_SESSION_QUESTIONS).contains(&total) || !(0..=total).contains(&correct) {
        return Err(StoreError::Invalid(format!(
            "{correct} of {total} questions is out of range"
        )));
    }
    if !(0..=MAX_SESSION_SECS).contains(&duration_secs) {
        return Err(StoreError::Invalid(format!(
            "duration of {duration_secs}s is out of range"
        )));
    }
    Ok(())
}

/// One graded answer as reported by a study client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    #[serde(default)]
    pub session_id: Option<i64>,
    pub subject: String,
    pub level: String,
    #[serde(default)]
    pub question_id: Option<String>,
    pub question_text: String,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    #[serde(default)]
    pub time_spent_secs: Option<i64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: i64,
    pub subject: String,
    pub level: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_questions: i64,
    pub correct_questions: i64,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStats {
    pub subject: String,
    pub level: String,
    pub total_questions: i64,
    pub correct_questions: i64,
    pub accuracy: f64,
    pub last_studied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    pub date: String,
    pub sessions: i64,
    pub questions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyStats {
    pub stats: Vec<LevelStats>,
    pub total_study_seconds: i64,
    pub recent_activity: Vec<DailyActivity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongAnswer {
    pub id: i64,
    pub subject: String,
    pub level: String,
    pub question_id: Option<String>,
    pub question_text: String,
    pub user_answer: String,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub wrong_count: i64,
    pub mastered: bool,
    pub last_wrong_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrongAnswerFilter {
    pub subject: Option<String>,
    pub level: Option<String>,
    #[serde(default)]
    pub unmastered_only: bool,
}

const RECENT_DAYS: i64 = 7;

/// Appends the record, bumps the wrong-answer list when incorrect and folds
/// the answer into the per level statistics.
pub(super) fn insert_answer_record(
    conn: &Connection,
    user_id: i64,
    record: &AnswerRecord,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO study_records (user_id, session_id, subject, level, question_id, question_text,
                                    user_answer, correct_answer, is_correct, time_spent_seconds, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            user_id,
            record.session_id,
            record.subject,
            record.level,
            record.question_id,
            record.question_text,
            record.user_answer,
            record.correct_answer,
            record.is_correct,
            record.time_spent_secs,
            now
        ],
    )?;
    if !record.is_correct {
        conn.execute(
            "INSERT INTO wrong_answers (user_id, subject, level, question_id, question_text, user_answer,
                                        correct_answer, explanation, last_wrong_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (user_id, subject, level, question_text) DO UPDATE SET
                 wrong_count = wrong_count + 1,
                 user_answer = excluded.user_answer,
                 last_wrong_at = excluded.last_wrong_at,
                 mastered = 0",
            params![
                user_id,
                record.subject,
                record.level,
                record.question_id,
                record.question_text,
                record.user_answer,
                record.correct_answer,
                record.explanation,
                now
            ],
        )?;
    }
    conn.execute(
        "INSERT INTO study_stats (user_id, subject, level, total_questions, correct_questions, last_studied_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)
         ON CONFLICT (user_id, subject, level) DO UPDATE SET
             total_questions = total_questions + 1,
             correct_questions = correct_questions + excluded.correct_questions,
             last_studied_at = excluded.last_studied_at",
        params![user_id, record.subject, record.level, i64::from(record.is_correct), now],
    )?;
    Ok(())
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<StudySession> {
    Ok(StudySession {
        id: row.get(0)?,
        subject: row.get(1)?,
        level: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        total_questions: row.get(5)?,
        correct_questions: row.get(6)?,
        duration_seconds: row.get(7)?,
    })
}

impl Store {
    /// Opens a new study session, closing any the user left open.
    pub fn start_study_session(
        &self,
        user_id: i64,
        subject: &str,
        level: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE study_sessions SET ended_at = ?2 WHERE user_id = ?1 AND ended_at IS NULL",
            params![user_id, now],
        )?;
        tx.execute(
            "INSERT INTO study_sessions (user_id, subject, level, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, subject, level, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn end_study_session(
        &self,
        user_id: i64,
        session_id: i64,
        total_questions: i64,
        correct_questions: i64,
        duration_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        check_session_counters(total_questions, correct_questions, duration_seconds)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE study_sessions
             SET ended_at = ?3, total_questions = ?4, correct_questions = ?5, duration_seconds = ?6
             WHERE id = ?1 AND user_id = ?2",
            params![
                session_id,
                user_id,
                now,
                total_questions,
                correct_questions,
                duration_seconds
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn record_answer(
        &self,
        user_id: i64,
        record: &AnswerRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_answer_record(&tx, user_id, record, now)?;
        tx.commit()?;
        Ok(())
    }

    pub fn study_history(&self, user_id: i64, limit: usize) -> Result<Vec<StudySession>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, subject, level, started_at, ended_at, total_questions, correct_questions, duration_seconds
             FROM study_sessions WHERE user_id = ?1
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )?;
        let sessions = stmt
            .query_map(params![user_id, limit as i64], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn study_stats(&self, user_id: i64, now: DateTime<Utc>) -> Result<StudyStats, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT subject, level, total_questions, correct_questions, last_studied_at
             FROM study_stats WHERE user_id = ?1 ORDER BY subject, level",
        )?;
        let stats = stmt
            .query_map(params![user_id], |row| {
                let total: i64 = row.get(2)?;
                let correct: i64 = row.get(3)?;
                Ok(LevelStats {
                    subject: row.get(0)?,
                    level: row.get(1)?,
                    total_questions: total,
                    correct_questions: correct,
                    accuracy: percentage(correct.max(0) as u64, total.max(0) as u64),
                    last_studied_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total_study_seconds: i64 = conn.query_row(
            "SELECT COALESCE(SUM(duration_seconds), 0) FROM study_sessions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        let since = now - Duration::days(RECENT_DAYS);
        let mut stmt = conn.prepare(
            "SELECT date(started_at), COUNT(*), COALESCE(SUM(total_questions), 0)
             FROM study_sessions WHERE user_id = ?1 AND started_at >= ?2
             GROUP BY date(started_at) ORDER BY date(started_at) DESC",
        )?;
        let recent_activity = stmt
            .query_map(params![user_id, since], |row| {
                Ok(DailyActivity {
                    date: row.get(0)?,
                    sessions: row.get(1)?,
                    questions: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StudyStats {
            stats,
            total_study_seconds,
            recent_activity,
        })
    }

    /// Most recently missed first.
    pub fn wrong_answers(
        &self,
        user_id: i64,
        filter: &WrongAnswerFilter,
    ) -> Result<Vec<WrongAnswer>, StoreError> {
        let mut sql = String::from(
            "SELECT id, subject, level, question_id, question_text, user_answer, correct_answer,
                    explanation, wrong_count, mastered, last_wrong_at
             FROM wrong_answers WHERE user_id = ?1",
        );
        let mut args = vec![Value::Integer(user_id)];
        if let Some(subject) = &filter.subject {
            args.push(Value::Text(subject.clone()));
            sql.push_str(&format!(" AND subject = ?{}", args.len()));
        }
        if let Some(level) = &filter.level {
            args.push(Value::Text(level.clone()));
            sql.push_str(&format!(" AND level = ?{}", args.len()));
        }
        if filter.unmastered_only {
            sql.push_str(" AND mastered = 0");
        }
        sql.push_str(" ORDER BY last_wrong_at DESC, id DESC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok(WrongAnswer {
                    id: row.get(0)?,
                    subject: row.get(1)?,
                    level: row.get(2)?,
                    question_id: row.get(3)?,
                    question_text: row.get(4)?,
                    user_answer: row.get(5)?,
                    correct_answer: row.get(6)?,
                    explanation: row.get(7)?,
                    wrong_count: row.get(8)?,
                    mastered: row.get(9)?,
                    last_wrong_at: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_mastered(&self, user_id: i64, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE wrong_answers SET mastered = 1, reviewed_at = ?3 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id, now],
        )?;
        Ok(changed > 0)
    }
}
