use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, params};

use super::study::{AnswerRecord, MAX_SESSION_SECS, check_session_counters, insert_answer_record};
use super::{Store, StoreError};
use crate::model::{AnswerValue, Question, UserProgress, percentage};
use crate::states::quiz_state::QuizResult;

fn upsert_progress(
    conn: &Connection,
    user_id: i64,
    subject: &str,
    correct: u64,
    total: u64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO user_progress (user_id, subject, total_questions, correct_answers, sessions, best_score, updated_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
         ON CONFLICT (user_id, subject) DO UPDATE SET
             total_questions = total_questions + excluded.total_questions,
             correct_answers = correct_answers + excluded.correct_answers,
             sessions = sessions + 1,
             best_score = MAX(best_score, excluded.best_score),
             updated_at = excluded.updated_at",
        params![
            user_id,
            subject,
            total as i64,
            correct as i64,
            percentage(correct, total),
            now
        ],
    )?;
    Ok(())
}

/// Converts reported session counters to stored integers, rejecting values
/// the history tables cannot hold.
fn session_counters(correct: u64, total: u64, duration_secs: u64) -> Result<(i64, i64, i64), StoreError> {
    let as_i64 = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
    let (correct, total, duration) = (as_i64(correct), as_i64(total), as_i64(duration_secs));
    check_session_counters(total, correct, duration)?;
    Ok((correct, total, duration))
}

fn append_finished_session(
    conn: &Connection,
    user_id: i64,
    subject: &str,
    level: &str,
    (correct, total, duration_secs): (i64, i64, i64),
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let started_at = TimeDelta::try_seconds(duration_secs)
        .and_then(|elapsed| now.checked_sub_signed(elapsed))
        .ok_or_else(|| StoreError::Invalid(format!("duration of {duration_secs}s is out of range")))?;
    conn.execute(
        "INSERT INTO study_sessions (user_id, subject, level, started_at, ended_at, total_questions, correct_questions, duration_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user_id,
            subject,
            level,
            started_at,
            now,
            total,
            correct,
            duration_secs
        ],
    )?;
    Ok(())
}

fn progress_row(conn: &Connection, user_id: i64, subject: &str) -> Result<UserProgress, StoreError> {
    let progress = conn.query_row(
        "SELECT subject, total_questions, correct_answers, sessions, best_score, updated_at
         FROM user_progress WHERE user_id = ?1 AND subject = ?2",
        params![user_id, subject],
        progress_from_row,
    )?;
    Ok(progress)
}

fn progress_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProgress> {
    Ok(UserProgress {
        subject: row.get(0)?,
        total: row.get::<_, i64>(1)?.max(0) as u64,
        correct: row.get::<_, i64>(2)?.max(0) as u64,
        sessions: row.get::<_, i64>(3)?.max(0) as u64,
        best_score: row.get(4)?,
        last_updated: row.get(5)?,
    })
}

fn answer_text(question: &Question, value: &AnswerValue) -> String {
    match value {
        AnswerValue::Choice(i) => question
            .options
            .get(*i)
            .cloned()
            .unwrap_or_else(|| i.to_string()),
        AnswerValue::Text(s) => s.clone(),
    }
}

impl Store {
    /// Adds one finished session to the user's subject totals and appends
    /// it to the study history.
    pub fn save_progress(
        &self,
        user_id: i64,
        subject: &str,
        correct: u64,
        total: u64,
        duration_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<UserProgress, StoreError> {
        let counters = session_counters(correct, total, duration_secs)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        upsert_progress(&tx, user_id, subject, correct, total, now)?;
        append_finished_session(&tx, user_id, subject, "", counters, now)?;
        let progress = progress_row(&tx, user_id, subject)?;
        tx.commit()?;
        Ok(progress)
    }

    pub fn progress_for_user(&self, user_id: i64) -> Result<Vec<UserProgress>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT subject, total_questions, correct_answers, sessions, best_score, updated_at
             FROM user_progress WHERE user_id = ?1 ORDER BY subject",
        )?;
        let rows = stmt
            .query_map(params![user_id], progress_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records a graded live quiz in one transaction: subject progress, a
    /// finished study session and one answer record per question.
    pub fn record_quiz_result(
        &self,
        user_id: i64,
        result: &QuizResult,
        questions: &[Question],
        now: DateTime<Utc>,
    ) -> Result<UserProgress, StoreError> {
        let correct = result.correct as u64;
        let total = result.total as u64;
        let elapsed = result.elapsed_secs.min(MAX_SESSION_SECS as u64);
        let counters = session_counters(correct, total, elapsed)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        upsert_progress(&tx, user_id, &result.subject, correct, total, now)?;
        append_finished_session(&tx, user_id, &result.subject, "quiz", counters, now)?;
        for (question, outcome) in questions.iter().zip(&result.outcomes) {
            let record = AnswerRecord {
                session_id: None,
                subject: result.subject.clone(),
                level: question.difficulty.level().to_string(),
                question_id: Some(question.id.clone()),
                question_text: question.question.text.clone(),
                user_answer: outcome
                    .given
                    .as_ref()
                    .map(|v| answer_text(question, v))
                    .unwrap_or_default(),
                correct_answer: answer_text(question, &outcome.expected),
                is_correct: outcome.correct,
                time_spent_secs: None,
                explanation: outcome.explanation.clone(),
            };
            insert_answer_record(&tx, user_id, &record, now)?;
        }
        let progress = progress_row(&tx, user_id, &result.subject)?;
        tx.commit()?;
        Ok(progress)
    }
}
