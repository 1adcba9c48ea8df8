use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use super::{Envelope, ok};
use crate::error::ApiError;
use crate::states::app_state::AppState;

pub async fn health(State(state): State<AppState>) -> Result<Json<Envelope<Value>>, ApiError> {
    state.store.ping()?;
    Ok(ok(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "media": state.media.backend_tag(),
        "timestamp": Utc::now(),
    })))
}
