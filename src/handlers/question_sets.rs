use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Envelope, ok};
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::media::question_sets::{history, latest, publish};
use crate::model::Question;
use crate::states::app_state::AppState;

pub async fn latest_set(
    State(state): State<AppState>,
    subject: Result<Path<String>, PathRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(subject) = subject?;
    let set = latest(state.media.as_ref(), &subject).await?;
    Ok(ok(json!({
        "subject": subject,
        "questions": set.questions,
        "metadata": set.metadata,
    })))
}

pub async fn set_history(
    State(state): State<AppState>,
    subject: Result<Path<String>, PathRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(subject) = subject?;
    let index = history(state.media.as_ref(), &subject).await?;
    Ok(ok(json!({
        "subject": subject,
        "count": index.files.len(),
        "files": index.files,
        "lastUpdated": index.last_updated,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub questions: Option<Vec<Question>>,
}

/// Publishes the given questions, or the subject's live bank when none are
/// sent.
pub async fn publish_set(
    State(state): State<AppState>,
    _admin: AdminAuth,
    subject: Result<Path<String>, PathRejection>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Path(subject) = subject?;
    let Json(request) = payload?;
    let questions = match request.questions {
        Some(questions) => questions,
        None => state.store.questions_for_subject(&subject)?,
    };
    if questions.is_empty() {
        return Err(ApiError::bad_request(format!(
            "no questions to publish for {subject}"
        )));
    }
    for question in &questions {
        question
            .validate()
            .map_err(|e| ApiError::BadRequest(format!("{}: {e}", question.id)))?;
    }
    let entry = publish(
        state.media.as_ref(),
        &subject,
        &questions,
        &state.config.public_media_url,
        state.config.question_set_history,
        Utc::now(),
    )
    .await?;
    Ok(ok(json!({
        "message": "question set published",
        "file": entry,
    })))
}
