use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::{Store, StoreError};

/// Bookkeeping row for an uploaded object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub key: String,
    pub subject: String,
    pub original_name: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: String,
    pub uploaded_by: Option<i64>,
    pub uploaded_at: DateTime<Utc>,
}

impl Store {
    pub fn insert_media(&self, record: &MediaRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO media_objects (key, subject, original_name, content_type, size, sha256, uploaded_by, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.key,
                record.subject,
                record.original_name,
                record.content_type,
                record.size as i64,
                record.sha256,
                record.uploaded_by,
                record.uploaded_at
            ],
        )?;
        Ok(())
    }

    /// Newest first, keys starting with `prefix`.
    pub fn list_media(&self, prefix: &str, limit: usize) -> Result<Vec<MediaRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, subject, original_name, content_type, size, sha256, uploaded_by, uploaded_at
             FROM media_objects WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY uploaded_at DESC, key DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![prefix, limit as i64], |row| {
                Ok(MediaRecord {
                    key: row.get(0)?,
                    subject: row.get(1)?,
                    original_name: row.get(2)?,
                    content_type: row.get(3)?,
                    size: row.get::<_, i64>(4)?.max(0) as u64,
                    sha256: row.get(5)?,
                    uploaded_by: row.get(6)?,
                    uploaded_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
