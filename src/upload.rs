//! File metadata rows, on the live draft side or frozen into a submission
use super::types::{DraftKey, TimeStamp, UploadMeta};
use super::utils::content_hash;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct Upload {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub org: String,
    #[n(2)]
    pub period: String,
    #[n(3)]
    pub category: String,
    #[n(4)]
    pub object_key: String,
    #[n(5)]
    pub size: u64,
    #[n(6)]
    pub content_type: String,
    #[n(7)]
    pub storage_ref: String, // location in object storage; bytes are never copied here
    #[n(8)]
    pub content_hash: String,
    #[n(9)]
    pub uploaded_by: String,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub submission_id: Option<String>,
    #[n(12)]
    pub is_snapshot: bool,
    #[n(13)]
    pub original_upload_id: Option<String>,
}

impl Upload {
    pub fn from_meta(id: String, key: &DraftKey, meta: &UploadMeta, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            org: key.org.clone(),
            period: key.period.clone(),
            category: meta.category.clone(),
            object_key: meta.object_key.clone(),
            size: meta.size,
            content_type: meta.content_type.clone(),
            storage_ref: meta.storage_ref.clone(),
            content_hash: content_hash(&meta.category, &meta.object_key, meta.size, &meta.storage_ref),
            uploaded_by: key.actor.clone(),
            created_at: now,
            submission_id: None,
            is_snapshot: false,
            original_upload_id: None,
        }
    }

    /// The first draft-side upload this row descends from.
    pub fn origin_id(&self) -> &str {
        self.original_upload_id.as_deref().unwrap_or(&self.id)
    }

    /// Submission-owned, immutable copy of this row.
    pub fn snapshot_for(&self, id: String, submission_id: &str, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            submission_id: Some(submission_id.to_string()),
            is_snapshot: true,
            original_upload_id: Some(self.origin_id().to_string()),
            ..self.clone()
        }
    }

    /// Draft-side copy of a snapshot row.
    pub fn draft_copy(&self, id: String, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            submission_id: None,
            is_snapshot: false,
            original_upload_id: Some(self.origin_id().to_string()),
            ..self.clone()
        }
    }
}
