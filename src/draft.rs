//! Draft rows: the mutable, per-actor working copy of a period's answers
use super::submission::Submission;
use super::types::{DraftKey, DraftPatch, Responses, TimeStamp};
use chrono::Utc;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct Draft {
    #[n(0)]
    pub id: String, // bech32 "draft_" id
    #[n(1)]
    pub org: String,
    #[n(2)]
    pub period: String, // period identifier, owned by the calendar collaborator
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub responses: Responses,
    #[n(5)]
    pub total_questions: u32,
    #[n(6)]
    pub completed: bool,
    #[n(7)]
    pub version: u64,
    #[n(8)]
    pub status: DraftStatus,
    #[n(9)]
    pub submitted_as_submission_id: Option<String>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub updated_at: TimeStamp<Utc>,
    #[n(12)]
    pub discarded_at: Option<TimeStamp<Utc>>,
    #[n(13)]
    pub discarded_by: Option<String>,
    #[n(14)]
    pub reopened_at: Option<TimeStamp<Utc>>,
    #[n(15)]
    pub reopened_by: Option<String>,
    #[n(16)]
    pub reopened_from_submission_id: Option<String>,
}

impl Draft {
    /// A blank active draft for the tuple.
    pub fn new(id: String, key: &DraftKey, version: u64, now: TimeStamp<Utc>) -> Self {
        Self {
            id,
            org: key.org.clone(),
            period: key.period.clone(),
            actor: key.actor.clone(),
            responses: Responses::new(),
            total_questions: 0,
            completed: false,
            version,
            status: DraftStatus::Draft,
            submitted_as_submission_id: None,
            created_at: now.clone(),
            updated_at: now,
            discarded_at: None,
            discarded_by: None,
            reopened_at: None,
            reopened_by: None,
            reopened_from_submission_id: None,
        }
    }

    /// A fresh draft carrying a submission's answers, owned by its submitter.
    pub fn seeded_from(id: String, submission: &Submission, version: u64, now: TimeStamp<Utc>) -> Self {
        let key = DraftKey::new(
            submission.org.clone(),
            submission.submitted_by.clone(),
            submission.period.clone(),
        );
        let mut draft = Self::new(id, &key, version, now);
        draft.responses = submission.responses.clone();
        draft.total_questions = submission.total_questions;
        draft.completed = submission.completed;
        draft
    }

    pub fn key(&self) -> DraftKey {
        DraftKey::new(self.org.clone(), self.actor.clone(), self.period.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status == DraftStatus::Draft
    }

    /// Merge a patch into the answer fields and bump `updated_at`.
    pub fn apply_patch(&mut self, patch: &DraftPatch, now: TimeStamp<Utc>) {
        if let Some(responses) = &patch.responses {
            self.responses = responses.clone();
        }
        if let Some(total) = patch.total_questions {
            self.total_questions = total;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_replaces_only_present_fields() {
        let key = DraftKey::new("A", "U1", "2025-Q1");
        let mut draft = Draft::new("draft_x".into(), &key, 1, TimeStamp::new());
        draft.apply_patch(
            &DraftPatch::new().set_response("q1", "yes").set_total_questions(4),
            TimeStamp::new(),
        );
        draft.apply_patch(&DraftPatch::new().set_completed(true), TimeStamp::new());

        assert_eq!(draft.responses["q1"], "yes");
        assert_eq!(draft.total_questions, 4);
        assert!(draft.completed);
        assert!(draft.is_active());
        assert_eq!(draft.key(), key);
    }

    #[test]
    fn draft_cbor_roundtrip() {
        let key = DraftKey::new("A", "U1", "2025-Q1");
        let mut draft = Draft::new("draft_x".into(), &key, 3, TimeStamp::new());
        draft.discarded_by = Some("U1".into());

        let encoded = minicbor::to_vec(&draft).unwrap();
        let decoded: Draft = minicbor::decode(&encoded).unwrap();
        assert_eq!(draft, decoded);
    }
}
