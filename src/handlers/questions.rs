use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Envelope, ok};
use crate::auth::{AdminAuth, authorize_admin};
use crate::error::ApiError;
use crate::model::{Question, QuestionPatch};
use crate::quiz::{DifficultySpec, SampleMode, SelectionSpec, select};
use crate::states::app_state::AppState;
use crate::store::QuestionFilter;

const DEFAULT_QUIZ_COUNT: usize = 10;
const MAX_QUIZ_COUNT: usize = 100;

pub async fn list_subjects(
    State(state): State<AppState>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let subjects = state.store.subjects()?;
    Ok(ok(json!({ "count": subjects.len(), "subjects": subjects })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub subject: Option<String>,
    pub difficulty: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_questions(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Query(query) = query?;
    let filter = QuestionFilter {
        subject: query.subject.filter(|s| !s.is_empty()),
        difficulty: query
            .difficulty
            .as_deref()
            .map(DifficultySpec::parse)
            .unwrap_or_default(),
        tag: query.tag.filter(|t| !t.is_empty()),
        limit: query.limit,
        offset: query.offset.unwrap_or(0),
    };
    let questions = state.store.list_questions(&filter)?;
    Ok(ok(json!({
        "count": questions.len(),
        "limit": filter.effective_limit(),
        "offset": filter.offset,
        "questions": questions,
    })))
}

pub async fn create_question(
    State(state): State<AppState>,
    _admin: AdminAuth,
    payload: Result<Json<Question>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let Json(question) = payload?;
    question.validate().map_err(ApiError::BadRequest)?;
    state.store.insert_question(&question, Utc::now())?;
    info!(id = %question.id, subject = %question.subject, "question created");
    Ok((StatusCode::CREATED, ok(json!({ "question": question }))))
}

pub async fn get_question(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(id) = id?;
    let question = state
        .store
        .get_question(&id)?
        .ok_or_else(|| ApiError::not_found(format!("question {id} not found")))?;
    Ok(ok(json!({ "question": question })))
}

pub async fn update_question(
    State(state): State<AppState>,
    _admin: AdminAuth,
    id: Result<Path<String>, PathRejection>,
    payload: Result<Json<QuestionPatch>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    let mut question = state
        .store
        .get_question(&id)?
        .ok_or_else(|| ApiError::not_found(format!("question {id} not found")))?;
    patch.apply(&mut question);
    question.validate().map_err(ApiError::BadRequest)?;
    if !state.store.update_question(&question, Utc::now())? {
        return Err(ApiError::not_found(format!("question {id} not found")));
    }
    info!(id = %id, "question updated");
    Ok(ok(json!({ "question": question })))
}

pub async fn delete_question(
    State(state): State<AppState>,
    _admin: AdminAuth,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(id) = id?;
    if !state.store.delete_question(&id, Utc::now())? {
        return Err(ApiError::not_found(format!("question {id} not found")));
    }
    info!(id = %id, "question deleted");
    Ok(ok(json!({ "message": "question deleted", "id": id })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuery {
    pub count: Option<usize>,
    pub difficulty: Option<String>,
    pub mode: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub include_answers: bool,
}

/// A quiz-ready random selection for one subject. Answers are only included
/// for admins.
pub async fn quiz_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    subject: Result<Path<String>, PathRejection>,
    query: Result<Query<QuizQuery>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(subject) = subject?;
    let Query(query) = query?;
    if query.include_answers {
        authorize_admin(&state, &headers)?;
    }
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<SampleMode>)
        .transpose()
        .map_err(ApiError::BadRequest)?
        .unwrap_or_default();
    let spec = SelectionSpec {
        count: query
            .count
            .unwrap_or(DEFAULT_QUIZ_COUNT)
            .clamp(1, MAX_QUIZ_COUNT),
        difficulty: query
            .difficulty
            .as_deref()
            .map(DifficultySpec::parse)
            .unwrap_or_default(),
        mode,
        tag: query.tag.filter(|t| !t.is_empty()),
    };

    let pool = state.store.questions_for_subject(&subject)?;
    let picked = select(&pool, &spec, &mut rand::thread_rng());
    let questions = if query.include_answers {
        serde_json::to_value(&picked)
    } else {
        serde_json::to_value(picked.iter().map(Question::view).collect::<Vec<_>>())
    }
    .map_err(|e| ApiError::Store(e.into()))?;
    Ok(ok(json!({
        "subject": subject,
        "count": picked.len(),
        "available": pool.len(),
        "questions": questions,
    })))
}
