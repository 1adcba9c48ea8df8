use axum::extract::DefaultBodyLimit;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::json;

use crate::handlers::{answers, auth, health, media, progress, question_sets, questions, study};
use crate::middleware::{cors_middleware, request_tracing_middleware};
use crate::states::app_state::AppState;
use crate::ws::ws_handler;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register))
        .route(
            "/auth/passkey/register/begin",
            post(auth::passkey_register_begin),
        )
        .route(
            "/auth/passkey/register/complete",
            post(auth::passkey_register_complete),
        )
        .route("/auth/passkey/login/begin", post(auth::passkey_login_begin))
        .route(
            "/auth/passkey/login/complete",
            post(auth::passkey_login_complete),
        )
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/user/profile", get(auth::profile))
        .route(
            "/note/questions",
            get(questions::list_questions).post(questions::create_question),
        )
        .route(
            "/note/questions/{id}",
            get(questions::get_question)
                .put(questions::update_question)
                .delete(questions::delete_question),
        )
        .route(
            "/note/progress",
            get(progress::get_progress).post(progress::save_progress),
        )
        .route("/subjects", get(questions::list_subjects))
        .route("/questions/{subject}", get(questions::quiz_questions))
        .route(
            "/questions/{subject}/sets",
            get(question_sets::set_history),
        )
        .route(
            "/question-sets/{subject}",
            get(question_sets::latest_set).post(question_sets::publish_set),
        )
        .route("/answers/normalize", post(answers::normalize))
        .route("/answers/check", post(answers::check))
        .route("/study/session/start", post(study::start_session))
        .route("/study/session/end", post(study::end_session))
        .route("/study/record", post(study::record))
        .route("/study/history", get(study::history))
        .route("/study/stats", get(study::stats))
        .route("/study/wrong-answers", get(study::wrong_answers))
        .route("/study/wrong-answers/master", post(study::master))
        .route("/upload", post(media::upload))
        .route("/upload/audio", post(media::upload_audio))
        .route("/media", get(media::list))
        .route("/media/{*key}", get(media::get_media))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("no route for {}", uri.path()),
            "code": "NOT_FOUND",
        })),
    )
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .nest("/api", api_routes())
        .nest("/ws", Router::new().route("/quiz", get(ws_handler)))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), cors_middleware))
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}
