use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{info, warn};

use super::{Envelope, ok};
use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::media::question_sets::public_url;
use crate::media::{MediaError, MediaKind, ObjectMeta, is_allowed_content_type, media_key};
use crate::states::app_state::AppState;
use crate::store::MediaRecord;

const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

struct UploadedFile {
    file_name: String,
    content_type: String,
    bytes: Bytes,
}

/// Pulls the file part named `field` and the optional `subject` text part.
async fn read_upload(
    mut multipart: Multipart,
    field: &str,
) -> Result<(UploadedFile, String), ApiError> {
    let mut file = None;
    let mut subject = String::new();
    while let Some(part) = multipart.next_field().await? {
        let name = part.name().map(str::to_string);
        match name.as_deref() {
            Some(name) if name == field => {
                let file_name = part.file_name().unwrap_or("upload").to_string();
                let content_type = part
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_ascii_lowercase();
                let bytes = part.bytes().await?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            Some("subject") => subject = part.text().await?.trim().to_string(),
            _ => {}
        }
    }
    let file =
        file.ok_or_else(|| ApiError::BadRequest(format!("multipart field `{field}` is required")))?;
    Ok((file, subject))
}

async fn store_upload(
    state: &AppState,
    admin: &AdminAuth,
    file: UploadedFile,
    subject: &str,
    audio_only: bool,
) -> Result<Value, ApiError> {
    if !is_allowed_content_type(&file.content_type) {
        return Err(ApiError::UnsupportedMedia(format!(
            "{} is not an accepted upload type",
            file.content_type
        )));
    }
    let kind = MediaKind::for_content_type(&file.content_type)
        .ok_or_else(|| ApiError::UnsupportedMedia(file.content_type.clone()))?;
    if audio_only && kind != MediaKind::Audio {
        return Err(ApiError::UnsupportedMedia(format!(
            "{} is not an audio type",
            file.content_type
        )));
    }
    let limit = state.config.max_upload_bytes;
    if file.bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded file is empty"));
    }
    if file.bytes.len() > limit {
        return Err(MediaError::TooLarge {
            size: file.bytes.len() as u64,
            limit: limit as u64,
        }
        .into());
    }

    let now = Utc::now();
    let key = media_key(kind, subject, &file.file_name, now, &mut rand::thread_rng());
    let meta = ObjectMeta::describe(&file.bytes, &file.content_type, Some(&file.file_name), now);
    let record = MediaRecord {
        key: key.clone(),
        subject: if subject.is_empty() {
            "general".to_string()
        } else {
            subject.to_string()
        },
        original_name: file.file_name.clone(),
        content_type: file.content_type.clone(),
        size: meta.size,
        sha256: meta.sha256.clone(),
        uploaded_by: admin.user.as_ref().map(|u| u.id),
        uploaded_at: now,
    };
    state.media.put(&key, file.bytes.to_vec(), meta).await?;
    if let Err(e) = state.store.insert_media(&record) {
        warn!(key = %key, error = %e, "upload stored but not indexed");
        return Err(e.into());
    }
    info!(key = %key, size = record.size, content_type = %record.content_type, "media uploaded");

    Ok(json!({
        "key": key,
        "filename": key,
        "url": public_url(&state.config.public_media_url, &key),
        "originalName": record.original_name,
        "size": record.size,
        "contentType": record.content_type,
        "sha256": record.sha256,
    }))
}

pub async fn upload(
    State(state): State<AppState>,
    admin: AdminAuth,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let (file, subject) = read_upload(multipart, "file").await?;
    let body = store_upload(&state, &admin, file, &subject, false).await?;
    Ok((StatusCode::CREATED, ok(body)))
}

pub async fn upload_audio(
    State(state): State<AppState>,
    admin: AdminAuth,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let (file, subject) = read_upload(multipart, "audio").await?;
    let body = store_upload(&state, &admin, file, &subject, true).await?;
    Ok((StatusCode::CREATED, ok(body)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<AppState>,
    _admin: AdminAuth,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, ApiError> {
    let Query(query) = query?;
    let prefix = query.prefix.unwrap_or_default();
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let objects = state.media.list(&prefix, limit).await?;
    let mut indexed: HashMap<String, MediaRecord> = state
        .store
        .list_media(&prefix, MAX_LIST_LIMIT)?
        .into_iter()
        .map(|r| (r.key.clone(), r))
        .collect();

    let files: Vec<Value> = objects
        .into_iter()
        .map(|object| {
            let record = indexed.remove(&object.key);
            json!({
                "url": public_url(&state.config.public_media_url, &object.key),
                "key": object.key,
                "size": object.size,
                "contentType": object.content_type,
                "uploadedAt": object.uploaded_at,
                "originalName": record.as_ref().map(|r| r.original_name.clone()),
                "subject": record.as_ref().map(|r| r.subject.clone()),
            })
        })
        .collect();
    Ok(ok(json!({ "count": files.len(), "files": files })))
}

/// Streams a stored object with its recorded content type.
pub async fn get_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    key: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(key) = key?;
    let object = state.media.get(&key).await?;
    let etag = format!("\"{}\"", object.meta.sha256);
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut response = if unchanged {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        object.bytes.into_response()
    };
    let headers = response.headers_mut();
    if !unchanged {
        let content_type = HeaderValue::from_str(&object.meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    Ok(response)
}
