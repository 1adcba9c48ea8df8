//! Published question-set snapshots: `questions/{subject}/{millis}.json`
//! plus an `index.json` listing the newest ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{MediaError, ObjectMeta, ObjectStore, is_safe_segment};
use crate::model::Question;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetEntry {
    pub filename: String,
    pub timestamp: i64,
    pub url: String,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetIndex {
    pub files: Vec<QuestionSetEntry>,
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    pub metadata: Option<QuestionSetEntry>,
}

fn index_key(subject: &str) -> String {
    format!("questions/{subject}/index.json")
}

fn check_subject(subject: &str) -> Result<(), MediaError> {
    if is_safe_segment(subject) {
        Ok(())
    } else {
        Err(MediaError::InvalidKey(format!("questions/{subject}")))
    }
}

pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

async fn load_index(store: &dyn ObjectStore, subject: &str) -> Result<QuestionSetIndex, MediaError> {
    match store.get(&index_key(subject)).await {
        Ok(object) => Ok(serde_json::from_slice(&object.bytes)?),
        Err(MediaError::NotFound(_)) => Ok(QuestionSetIndex::default()),
        Err(e) => Err(e),
    }
}

/// Stores a snapshot of `questions` and records it at the head of the
/// subject index. Only the newest `keep` snapshots survive.
pub async fn publish(
    store: &dyn ObjectStore,
    subject: &str,
    questions: &[Question],
    public_base: &str,
    keep: usize,
    now: DateTime<Utc>,
) -> Result<QuestionSetEntry, MediaError> {
    check_subject(subject)?;
    let millis = now.timestamp_millis();
    let filename = format!("questions/{subject}/{millis}.json");
    let body = serde_json::to_vec_pretty(questions)?;
    let meta = ObjectMeta::describe(&body, "application/json", None, now);
    store.put(&filename, body, meta).await?;

    let entry = QuestionSetEntry {
        url: public_url(public_base, &filename),
        filename,
        timestamp: millis,
        count: questions.len(),
    };

    let mut index = load_index(store, subject).await?;
    index.files.retain(|f| f.filename != entry.filename);
    index.files.insert(0, entry.clone());
    let stale = index.files.split_off(index.files.len().min(keep.max(1)));
    for old in stale {
        if let Err(e) = store.delete(&old.filename).await {
            warn!(file = %old.filename, error = %e, "failed to drop stale question set");
        }
    }
    index.last_updated = millis;

    let body = serde_json::to_vec_pretty(&index)?;
    let meta = ObjectMeta::describe(&body, "application/json", None, now);
    store.put(&index_key(subject), body, meta).await?;
    info!(subject, file = %entry.filename, count = entry.count, "published question set");
    Ok(entry)
}

/// Every retained snapshot of a subject, newest first.
pub async fn history(store: &dyn ObjectStore, subject: &str) -> Result<QuestionSetIndex, MediaError> {
    check_subject(subject)?;
    load_index(store, subject).await
}

/// The newest published snapshot, or an empty set when nothing was published.
pub async fn latest(store: &dyn ObjectStore, subject: &str) -> Result<QuestionSet, MediaError> {
    check_subject(subject)?;
    let index = load_index(store, subject).await?;
    let Some(entry) = index.files.into_iter().next() else {
        return Ok(QuestionSet {
            questions: Vec::new(),
            metadata: None,
        });
    };
    let object = store.get(&entry.filename).await?;
    Ok(QuestionSet {
        questions: serde_json::from_slice(&object.bytes)?,
        metadata: Some(entry),
    })
}
