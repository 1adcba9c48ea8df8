//! Object storage for uploaded media and published question sets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

pub mod question_sets;

pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/mp3",
    "audio/mpeg",
    "audio/wav",
    "audio/x-wav",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "application/json",
];

const MAX_KEY_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("object is {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("object metadata is invalid: {0}")]
    Meta(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn describe(
        bytes: &[u8],
        content_type: &str,
        original_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            sha256: sha256_hex(bytes),
            original_name: original_name.map(str::to_string),
            uploaded_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    /// Writes `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>, meta: ObjectMeta) -> Result<(), MediaError>;

    async fn get(&self, key: &str) -> Result<StoredObject, MediaError>;

    /// Returns whether an object was removed.
    async fn delete(&self, key: &str) -> Result<bool, MediaError>;

    /// Keys starting with `prefix`, in key order.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectSummary>, MediaError>;
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn is_allowed_content_type(content_type: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&content_type)
}

/// Rejects keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<(), MediaError> {
    let bad = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(MediaError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub(crate) fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Image,
    Data,
}

impl MediaKind {
    pub fn for_content_type(content_type: &str) -> Option<Self> {
        if !is_allowed_content_type(content_type) {
            return None;
        }
        if content_type.starts_with("audio/") {
            Some(MediaKind::Audio)
        } else if content_type.starts_with("image/") {
            Some(MediaKind::Image)
        } else {
            Some(MediaKind::Data)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Data => "data",
        }
    }
}

/// `assets/{kind}/{subject}/{millis}_{8 hex}.{ext}`; the extension comes from
/// the uploaded file name and is dropped when it is not plain alphanumeric.
pub fn media_key<R: Rng + ?Sized>(
    kind: MediaKind,
    subject: &str,
    file_name: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let subject = if is_safe_segment(subject) {
        subject
    } else {
        "general"
    };
    let suffix: [u8; 4] = rng.r#gen();
    let stem = format!(
        "assets/{}/{}/{}_{}",
        kind.as_str(),
        subject,
        now.timestamp_millis(),
        hex::encode(suffix)
    );
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Objects under `root/objects`, metadata sidecars under `root/meta`.
pub struct LocalFsObjectStore {
    root: PathBuf,
}

impl LocalFsObjectStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, MediaError> {
        validate_key(key)?;
        Ok(self.root.join("objects").join(key))
    }

    fn meta_path(&self, key: &str) -> Result<PathBuf, MediaError> {
        validate_key(key)?;
        Ok(self.root.join("meta").join(format!("{key}.json")))
    }

    async fn read_meta(&self, key: &str) -> Result<ObjectMeta, MediaError> {
        let bytes = tokio::fs::read(self.meta_path(key)?).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn not_found_as(err: std::io::Error, key: &str) -> MediaError {
    if err.kind() == std::io::ErrorKind::NotFound {
        MediaError::NotFound(key.to_string())
    } else {
        MediaError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    fn backend_tag(&self) -> &'static str {
        "localfs"
    }

    #[instrument(skip(self, bytes, meta), fields(size = bytes.len()))]
    async fn put(&self, key: &str, bytes: Vec<u8>, meta: ObjectMeta) -> Result<(), MediaError> {
        let object_path = self.object_path(key)?;
        let meta_path = self.meta_path(key)?;
        for path in [&object_path, &meta_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&object_path, &bytes).await?;
        tokio::fs::write(&meta_path, serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, MediaError> {
        let bytes = tokio::fs::read(self.object_path(key)?)
            .await
            .map_err(|e| not_found_as(e, key))?;
        let meta = match self.read_meta(key).await {
            Ok(meta) => meta,
            Err(MediaError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                ObjectMeta::describe(&bytes, "application/octet-stream", None, Utc::now())
            }
            Err(e) => return Err(e),
        };
        Ok(StoredObject { meta, bytes })
    }

    async fn delete(&self, key: &str) -> Result<bool, MediaError> {
        let removed = match tokio::fs::remove_file(self.object_path(key)?).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = tokio::fs::remove_file(self.meta_path(key)?).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        Ok(removed)
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectSummary>, MediaError> {
        let base = self.root.join("objects");
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        keys.truncate(limit);

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let summary = match self.read_meta(&key).await {
                Ok(meta) => ObjectSummary {
                    key,
                    size: meta.size,
                    content_type: meta.content_type,
                    uploaded_at: meta.uploaded_at,
                },
                Err(MediaError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    let stat = tokio::fs::metadata(self.object_path(&key)?).await?;
                    ObjectSummary {
                        key,
                        size: stat.len(),
                        content_type: "application/octet-stream".to_string(),
                        uploaded_at: stat.modified().map(DateTime::<Utc>::from)?,
                    }
                }
                Err(e) => return Err(e),
            };
            out.push(summary);
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, meta: ObjectMeta) -> Result<(), MediaError> {
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert(key.to_string(), StoredObject { meta, bytes });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StoredObject, MediaError> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, MediaError> {
        validate_key(key)?;
        Ok(self.objects.write().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectSummary>, MediaError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.meta.size,
                content_type: object.meta.content_type.clone(),
                uploaded_at: object.meta.uploaded_at,
            })
            .collect())
    }
}
