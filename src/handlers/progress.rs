use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{Envelope, ok};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::states::app_state::AppState;
use crate::store::{MAX_SESSION_QUESTIONS, MAX_SESSION_SECS};

pub async fn get_progress(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let progress = state.store.progress_for_user(user.id)?;
    Ok(ok(json!({ "progress": progress })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgress {
    pub subject: String,
    pub correct: u64,
    pub total: u64,
    #[serde(default)]
    pub duration_secs: u64,
}

pub async fn save_progress(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
    payload: Result<Json<SaveProgress>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(body) = payload?;
    let subject = body.subject.trim();
    if subject.is_empty() {
        return Err(ApiError::bad_request("subject is required"));
    }
    if body.total == 0 || body.correct > body.total {
        return Err(ApiError::bad_request(
            "total must be positive and at least correct",
        ));
    }
    if body.total > MAX_SESSION_QUESTIONS as u64 {
        return Err(ApiError::bad_request(format!(
            "total may not exceed {MAX_SESSION_QUESTIONS}"
        )));
    }
    if body.duration_secs > MAX_SESSION_SECS as u64 {
        return Err(ApiError::bad_request(format!(
            "durationSecs may not exceed {MAX_SESSION_SECS}"
        )));
    }
    let progress = state.store.save_progress(
        user.id,
        subject,
        body.correct,
        body.total,
        body.duration_secs,
        Utc::now(),
    )?;
    info!(user_id = user.id, subject, correct = body.correct, total = body.total, "progress saved");
    Ok(ok(json!({
        "progress": progress,
        "accuracy": progress.accuracy(),
    })))
}
