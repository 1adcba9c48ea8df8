use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Envelope, ok};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::states::app_state::AppState;
use crate::store::{
    AnswerRecord, MAX_SESSION_QUESTIONS, MAX_SESSION_SECS, StudyStats, WrongAnswerFilter,
};

const DEFAULT_HISTORY: usize = 20;
const MAX_HISTORY: usize = 100;

#[derive(Debug, Deserialize)]
pub struct StartSession {
    pub subject: String,
    pub level: String,
}

pub async fn start_session(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<StartSession>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(body) = payload?;
    if body.subject.trim().is_empty() || body.level.trim().is_empty() {
        return Err(ApiError::bad_request("subject and level are required"));
    }
    let session_id =
        state
            .store
            .start_study_session(user.id, body.subject.trim(), body.level.trim(), Utc::now())?;
    info!(user_id = user.id, session_id, subject = %body.subject, "study session started");
    Ok(ok(json!({ "sessionId": session_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSession {
    pub session_id: i64,
    #[serde(default)]
    pub total_questions: i64,
    #[serde(default)]
    pub correct_questions: i64,
    #[serde(default)]
    pub duration_seconds: i64,
}

pub async fn end_session(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<EndSession>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(body) = payload?;
    if !(0..=MAX_SESSION_QUESTIONS).contains(&body.total_questions)
        || body.correct_questions < 0
        || body.correct_questions > body.total_questions
        || !(0..=MAX_SESSION_SECS).contains(&body.duration_seconds)
    {
        return Err(ApiError::bad_request("session counters are inconsistent"));
    }
    let ended = state.store.end_study_session(
        user.id,
        body.session_id,
        body.total_questions,
        body.correct_questions,
        body.duration_seconds,
        Utc::now(),
    )?;
    if !ended {
        return Err(ApiError::not_found(format!(
            "study session {} not found",
            body.session_id
        )));
    }
    Ok(ok(json!({ "message": "study session ended" })))
}

pub async fn record(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<AnswerRecord>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(record) = payload?;
    if record.subject.trim().is_empty() || record.question_text.trim().is_empty() {
        return Err(ApiError::bad_request("subject and questionText are required"));
    }
    state.store.record_answer(user.id, &record, Utc::now())?;
    debug!(user_id = user.id, correct = record.is_correct, "answer recorded");
    Ok(ok(json!({ "message": "answer recorded" })))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn history(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    let sessions = state.store.study_history(user.id, limit)?;
    Ok(ok(json!({ "sessions": sessions })))
}

pub async fn stats(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Envelope<StudyStats>>, ApiError> {
    Ok(ok(state.store.study_stats(user.id, Utc::now())?))
}

pub async fn wrong_answers(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    query: Result<Query<WrongAnswerFilter>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Query(filter) = query?;
    let wrong = state.store.wrong_answers(user.id, &filter)?;
    Ok(ok(json!({ "wrongAnswers": wrong })))
}

#[derive(Debug, Deserialize)]
pub struct MasterRequest {
    pub id: i64,
}

pub async fn master(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<MasterRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(body) = payload?;
    if !state.store.mark_mastered(user.id, body.id, Utc::now())? {
        return Err(ApiError::not_found(format!(
            "wrong answer {} not found",
            body.id
        )));
    }
    Ok(ok(json!({ "message": "marked as mastered" })))
}
