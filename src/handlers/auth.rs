use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Envelope, ok};
use crate::auth::passkey::{
    PublicKeyCredential, RelyingParty, creation_options, generate_challenge, request_options,
    verify_client_data,
};
use crate::auth::{AuthUser, Registration, expires_after, issue_session};
use crate::error::ApiError;
use crate::states::app_state::AppState;
use crate::store::{ChallengeKind, NewUser, User};

/// Users are addressed by numeric id or by user id / display name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserRef {
    Id(i64),
    Login(String),
}

impl UserRef {
    fn as_login(&self) -> String {
        match self {
            UserRef::Id(id) => id.to_string(),
            UserRef::Login(login) => login.trim().to_string(),
        }
    }
}

fn user_summary(user: &User) -> Value {
    json!({
        "id": user.id,
        "userId": user.username,
        "displayName": user.display_name,
        "inquiryNumber": user.inquiry_number,
    })
}

fn find_user(state: &AppState, user: &UserRef) -> Result<User, ApiError> {
    state
        .store
        .find_user_by_login(&user.as_login())?
        .ok_or_else(|| ApiError::not_found("user not found; register first"))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Registration>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let Json(registration) = payload?;
    registration.validate().map_err(ApiError::BadRequest)?;
    let mut user = state.store.create_user(
        &NewUser {
            username: registration.user_id.trim(),
            display_name: registration.display_name.trim(),
            inquiry_number: &registration.inquiry_number,
        },
        Utc::now(),
    )?;
    if state.config.is_admin_user(&user.username) {
        user.is_admin = state.store.set_admin(user.id, true)?;
    }
    info!(user_id = user.id, username = %user.username, admin = user.is_admin, "user registered");
    Ok((
        StatusCode::CREATED,
        ok(json!({
            "message": "registration complete",
            "userId": user.id,
            "user": user_summary(&user),
        })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRequest {
    #[serde(default)]
    pub user_id: Option<UserRef>,
}

pub async fn passkey_register_begin(
    State(state): State<AppState>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    let user_ref = request
        .user_id
        .ok_or_else(|| ApiError::bad_request("userId is required"))?;
    let user = find_user(&state, &user_ref)?;

    let challenge = generate_challenge(&mut rand::thread_rng());
    let expires_at = expires_after(Utc::now(), state.config.challenge_ttl_secs);
    state.store.insert_challenge(
        &challenge,
        Some(user.id),
        ChallengeKind::Registration,
        expires_at,
    )?;
    let existing = state.store.credential_ids_for_user(user.id)?;
    let rp = RelyingParty {
        name: state.config.rp_name.clone(),
        id: state.config.rp_id.clone(),
    };
    let options = creation_options(rp, &user, challenge, existing);
    Ok(ok(json!({ "options": options, "userId": user.id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterComplete {
    pub user_id: UserRef,
    pub credential: PublicKeyCredential,
    pub challenge: String,
}

pub async fn passkey_register_complete(
    State(state): State<AppState>,
    payload: Result<Json<RegisterComplete>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    let user = find_user(&state, &request.user_id)?;
    let now = Utc::now();
    state
        .store
        .consume_challenge(
            &request.challenge,
            ChallengeKind::Registration,
            Some(user.id),
            now,
        )?
        .ok_or_else(|| ApiError::bad_request("challenge is invalid or expired"))?;
    verify_client_data(
        &request.credential,
        ChallengeKind::Registration,
        &request.challenge,
    )
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let public_key = request
        .credential
        .response
        .attestation_object
        .as_deref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::bad_request("attestationObject is required"))?;
    state
        .store
        .insert_credential(user.id, &request.credential.id, public_key, now)?;
    info!(user_id = user.id, "passkey registered");
    Ok(ok(json!({
        "message": "passkey registered",
        "credentialId": request.credential.id,
    })))
}

/// Without a user the challenge is open to any registered passkey.
pub async fn passkey_login_begin(
    State(state): State<AppState>,
    payload: Result<Json<BeginRequest>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    let (user_id, credentials) = match &request.user_id {
        Some(user_ref) => {
            let user = find_user(&state, user_ref)?;
            let credentials = state.store.credential_ids_for_user(user.id)?;
            if credentials.is_empty() {
                return Err(ApiError::not_found("this user has no registered passkey"));
            }
            (Some(user.id), credentials)
        }
        None => (None, Vec::new()),
    };

    let challenge = generate_challenge(&mut rand::thread_rng());
    let expires_at = expires_after(Utc::now(), state.config.challenge_ttl_secs);
    state.store.insert_challenge(
        &challenge,
        user_id,
        ChallengeKind::Authentication,
        expires_at,
    )?;
    let options = request_options(&state.config.rp_id, challenge, credentials);
    Ok(ok(json!({ "options": options })))
}

#[derive(Debug, Deserialize)]
pub struct LoginComplete {
    pub credential: PublicKeyCredential,
    pub challenge: String,
}

pub async fn passkey_login_complete(
    State(state): State<AppState>,
    payload: Result<Json<LoginComplete>, JsonRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Json(request) = payload?;
    let now = Utc::now();
    let challenge = state
        .store
        .consume_challenge(&request.challenge, ChallengeKind::Authentication, None, now)?
        .ok_or_else(|| ApiError::bad_request("challenge is invalid or expired"))?;
    let credential = state
        .store
        .credential_by_id(&request.credential.id)?
        .ok_or_else(|| ApiError::not_found("credential not found"))?;
    if challenge
        .user_id
        .is_some_and(|owner| owner != credential.user_id)
    {
        warn!(credential = %credential.credential_id, "passkey used against another user's challenge");
        return Err(ApiError::bad_request("credential does not belong to this user"));
    }
    verify_client_data(
        &request.credential,
        ChallengeKind::Authentication,
        &request.challenge,
    )
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.store.touch_credential(credential.id, now)?;
    state.store.touch_login(credential.user_id, now)?;
    let (token, expires_at) =
        issue_session(&state.store, credential.user_id, state.config.session_ttl_secs, now)?;
    let user = state
        .store
        .user_by_id(credential.user_id)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    info!(user_id = user.id, "passkey login");
    Ok(ok(json!({
        "token": token,
        "expiresAt": expires_at,
        "user": user_summary(&user),
    })))
}

pub async fn me(AuthUser { user, .. }: AuthUser) -> Json<Envelope<Value>> {
    ok(json!({ "user": user }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Envelope<Value>>, ApiError> {
    state.store.delete_session(&auth.token_hash)?;
    info!(user_id = auth.user.id, "logged out");
    Ok(ok(json!({ "message": "logged out" })))
}

pub async fn profile(
    State(state): State<AppState>,
    AuthUser { user, .. }: AuthUser,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let progress = state.store.progress_for_user(user.id)?;
    let stats = state.store.study_stats(user.id, Utc::now())?;
    Ok(ok(json!({
        "user": user,
        "progress": progress,
        "stats": stats,
    })))
}
