//! Registration rules, bearer sessions and the request extractors that
//! guard user and admin routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, request::Parts};
use chrono::{DateTime, TimeDelta, Utc};
use rand::RngCore;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::ApiError;
use crate::media::sha256_hex;
use crate::states::app_state::AppState;
use crate::store::{Store, StoreError, User};

pub mod passkey;

static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,}$").expect("user id pattern"));
static INQUIRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{6}$").expect("inquiry number pattern"));

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user_id: String,
    pub display_name: String,
    pub inquiry_number: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), String> {
        if !USER_ID_RE.is_match(&self.user_id) {
            return Err(
                "userId must be at least 3 characters of letters, digits, '_' or '-'".to_string(),
            );
        }
        if self.display_name.trim().is_empty() {
            return Err("displayName is required".to_string());
        }
        if !INQUIRY_RE.is_match(&self.inquiry_number) {
            return Err("inquiryNumber must be exactly 6 digits".to_string());
        }
        Ok(())
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_token<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Only this digest of a session token is ever stored.
pub fn hash_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// `now + ttl_secs`, saturating at the latest representable time.
pub fn expires_after(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Creates a session for `user_id` and returns the plaintext token.
pub fn issue_session(
    store: &Store,
    user_id: i64,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), StoreError> {
    let token = generate_token(&mut rand::thread_rng());
    let expires_at = expires_after(now, ttl_secs);
    store.create_session(user_id, &hash_token(&token), expires_at, now)?;
    Ok((token, expires_at))
}

/// A signed-in user.
pub struct AuthUser {
    pub user: User,
    pub token_hash: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let token_hash = hash_token(token);
        let user = state
            .store
            .session_user(&token_hash, Utc::now())?
            .ok_or_else(|| ApiError::Unauthorized("session is invalid or expired".to_string()))?;
        Ok(Self { user, token_hash })
    }
}

/// Either the configured admin token or a session of an admin user.
pub struct AdminAuth {
    pub user: Option<User>,
}

pub fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<AdminAuth, ApiError> {
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    if state
        .config
        .admin_token
        .as_deref()
        .is_some_and(|admin| admin == token)
    {
        debug!("admin token accepted");
        return Ok(AdminAuth { user: None });
    }
    match state.store.session_user(&hash_token(token), Utc::now())? {
        Some(user) if user.is_admin => Ok(AdminAuth { user: Some(user) }),
        Some(_) => Err(ApiError::Forbidden("admin access required".to_string())),
        None => Err(ApiError::Unauthorized("invalid token".to_string())),
    }
}

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authorize_admin(state, &parts.headers)
    }
}
