use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Envelope, ok};
use crate::error::ApiError;
use crate::model::{AnswerValue, QuestionKind};
use crate::quiz::{NormalizeMode, answers_match, normalize_answer};
use crate::states::app_state::AppState;

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub answer: String,
    #[serde(default)]
    pub mode: Option<NormalizeMode>,
}

pub async fn normalize(
    payload: Result<Json<NormalizeRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    let result = normalize_answer(&request.answer, request.mode.unwrap_or_default());
    Ok(ok(json!({
        "valid": result.is_valid(),
        "normalized": result.normalized,
        "errors": result.errors,
        "warnings": result.warnings,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(default)]
    pub question_id: Option<String>,
    pub answer: AnswerValue,
    #[serde(default)]
    pub expected: Option<Vec<String>>,
    #[serde(default)]
    pub mode: Option<NormalizeMode>,
}

/// Grades an answer against a stored question, or against explicit
/// expected forms with the math normalizer.
pub async fn check(
    State(state): State<AppState>,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    if let Some(id) = request.question_id.as_deref() {
        let question = state
            .store
            .get_question(id)?
            .ok_or_else(|| ApiError::not_found(format!("question {id} not found")))?;
        question
            .accepts_shape(&request.answer)
            .map_err(ApiError::BadRequest)?;
        let correct = question.is_correct(&request.answer);
        let normalized = match (&request.answer, question.kind) {
            (AnswerValue::Text(text), QuestionKind::Math) => Some(
                normalize_answer(text, question.answer_mode.unwrap_or_default()).normalized,
            ),
            _ => None,
        };
        return Ok(ok(json!({
            "questionId": question.id,
            "correct": correct,
            "normalized": normalized,
            "correctAnswer": question.answer,
            "explanation": question.explanation,
        })));
    }

    let expected = request
        .expected
        .filter(|forms| !forms.is_empty())
        .ok_or_else(|| ApiError::bad_request("questionId or expected is required"))?;
    let AnswerValue::Text(given) = &request.answer else {
        return Err(ApiError::bad_request("answer must be text"));
    };
    let mode = request.mode.unwrap_or_default();
    let forms: Vec<&str> = expected.iter().map(String::as_str).collect();
    let normalized = normalize_answer(given, mode);
    Ok(ok(json!({
        "correct": answers_match(given, &forms, mode),
        "normalized": normalized.normalized,
        "errors": normalized.errors,
        "warnings": normalized.warnings,
    })))
}
