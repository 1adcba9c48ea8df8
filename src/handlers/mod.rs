use axum::Json;
use serde::Serialize;

pub mod answers;
pub mod auth;
pub mod health;
pub mod media;
pub mod progress;
pub mod question_sets;
pub mod questions;
pub mod study;

/// `{"success": true, ...data}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
    })
}
