//! Submission rows: the reviewable artifact frozen from a draft
use super::draft::Draft;
use super::types::{DraftPatch, PeriodScope, Responses, TimeStamp};
use chrono::Utc;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    #[n(0)]
    Open,
    #[n(1)]
    Locked,
    #[n(2)]
    Archived,
    #[n(3)]
    Discarded,
    // values written before drafts moved to their own rows
    #[n(4)]
    LegacyDraft,
    #[n(5)]
    LegacySubmitted,
}

impl SubmissionStatus {
    /// OPEN and LOCKED rows hold the per-period live slot.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Open | Self::Locked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize)]
pub struct Submission {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub org: String,
    #[n(2)]
    pub period: String,
    #[n(3)]
    pub submitted_by: String,
    #[n(4)]
    pub responses: Responses,
    #[n(5)]
    pub total_questions: u32,
    #[n(6)]
    pub completed: bool,
    #[n(7)]
    pub version: u64, // carried over from the source draft
    #[n(8)]
    pub status: SubmissionStatus,
    #[n(9)]
    pub is_latest: bool,
    #[n(10)]
    pub parent_submission_id: Option<String>,
    #[n(11)]
    pub source_draft_id: String,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
    #[n(14)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(15)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(16)]
    pub approved_by: Option<String>,
    #[n(17)]
    pub reopened_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub reopened_by: Option<String>,
    #[n(19)]
    pub discarded_at: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub discarded_by: Option<String>,
}

impl Submission {
    pub fn from_draft(
        id: String,
        draft: &Draft,
        parent_submission_id: Option<String>,
        now: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            org: draft.org.clone(),
            period: draft.period.clone(),
            submitted_by: draft.actor.clone(),
            responses: draft.responses.clone(),
            total_questions: draft.total_questions,
            completed: draft.completed,
            version: draft.version,
            status: SubmissionStatus::Open,
            is_latest: true,
            parent_submission_id,
            source_draft_id: draft.id.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
            submitted_at: now,
            approved_at: None,
            approved_by: None,
            reopened_at: None,
            reopened_by: None,
            discarded_at: None,
            discarded_by: None,
        }
    }

    pub fn scope(&self) -> PeriodScope {
        PeriodScope::new(self.org.clone(), self.period.clone())
    }

    pub(crate) fn apply_patch(&mut self, patch: &DraftPatch, now: TimeStamp<Utc>) {
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
