//! Authoritative state machine for drafts and submissions.
//!
//! Every status or audit-field write goes through `apply_draft_event` or
//! `apply_submission_event`; the tables in `DraftStatus::next` and
//! `SubmissionStatus::next` are the only place transitions are defined.
//!
//! ```text
//! Draft:       DRAFT --discard|submit--> ARCHIVED --resurrect(reopen)--> DRAFT
//! Submission:  OPEN --approve--> LOCKED          (LOCKED -> OPEN never)
//!              OPEN|LOCKED|legacy SUBMITTED --reopen--> ARCHIVED
//!              legacy DRAFT --discard--> DISCARDED
//! ```

use super::draft::{Draft, DraftStatus};
use super::error::{Conflict, Forbidden, NotFound, Result};
use super::snapshot::Snapshotter;
use super::store::{InsertOutcome, Store, Tx, TxResult, abort_with};
use super::submission::{Submission, SubmissionStatus};
use super::types::{Actor, DraftKey, DraftPatch, PeriodScope, TimeStamp};
use super::utils::{DRAFT_HRP, new_row_id};
use super::version::VersionAllocator;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftEvent<'a> {
    /// Superseded by start-fresh.
    Discard,
    /// Frozen into the given submission.
    Submit { submission_id: &'a str },
    /// Brought back by reopening the submission it was frozen into.
    Resurrect { submission_id: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionEvent {
    Approve,
    Reopen,
    Discard,
}

impl DraftStatus {
    pub fn next(self, event: &DraftEvent<'_>) -> Option<DraftStatus> {
        match (self, event) {
            (DraftStatus::Draft, DraftEvent::Discard | DraftEvent::Submit { .. }) => {
                Some(DraftStatus::Archived)
            }
            (DraftStatus::Archived, DraftEvent::Resurrect { .. }) => Some(DraftStatus::Draft),
            _ => None,
        }
    }
}

impl SubmissionStatus {
    pub fn next(self, event: SubmissionEvent) -> Option<SubmissionStatus> {
        use SubmissionStatus::*;
        match (self, event) {
            (Open | Locked, SubmissionEvent::Approve) => Some(Locked),
            (Open | Locked | LegacySubmitted, SubmissionEvent::Reopen) => Some(Archived),
            (LegacyDraft, SubmissionEvent::Discard) => Some(Discarded),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Discarded)
    }
}

impl DraftEvent<'_> {
    pub fn action(&self) -> &'static str {
        match self {
            DraftEvent::Discard => "discard",
            DraftEvent::Submit { .. } => "submit",
            DraftEvent::Resurrect { .. } => "resurrect",
        }
    }
}

impl SubmissionEvent {
    pub fn action(self) -> &'static str {
        match self {
            SubmissionEvent::Approve => "approve",
            SubmissionEvent::Reopen => "reopen",
            SubmissionEvent::Discard => "discard",
        }
    }
}

pub(crate) fn rejected(from: impl std::fmt::Debug, action: &str) -> Forbidden {
    Forbidden::Transition {
        from: format!("{from:?}"),
        action: action.to_string(),
    }
}

/// Apply a draft transition and its audit fields.
pub fn apply_draft_event(
    draft: &mut Draft,
    event: DraftEvent<'_>,
    actor: &str,
    now: TimeStamp<Utc>,
) -> std::result::Result<(), Forbidden> {
    let next = draft
        .status
        .next(&event)
        .ok_or_else(|| rejected(draft.status, event.action()))?;

    match event {
        DraftEvent::Discard => {
            draft.discarded_at = Some(now.clone());
            draft.discarded_by = Some(actor.to_string());
        }
        DraftEvent::Submit { submission_id } => {
            draft.submitted_as_submission_id = Some(submission_id.to_string());
        }
        DraftEvent::Resurrect { submission_id } => {
            if draft.submitted_as_submission_id.as_deref() != Some(submission_id) {
                return Err(rejected(draft.status, event.action()));
            }
            draft.reopened_at = Some(now.clone());
            draft.reopened_by = Some(actor.to_string());
            draft.reopened_from_submission_id = Some(submission_id.to_string());
        }
    }
    draft.status = next;
    draft.updated_at = now;
    Ok(())
}

/// Apply a submission transition. Returns `false` when the event was a no-op
/// (approving an already locked submission), in which case nothing changed.
pub fn apply_submission_event(
    submission: &mut Submission,
    event: SubmissionEvent,
    actor: &str,
    now: TimeStamp<Utc>,
) -> std::result::Result<bool, Forbidden> {
    let next = submission
        .status
        .next(event)
        .ok_or_else(|| rejected(submission.status, event.action()))?;
    if next == submission.status {
        return Ok(false);
    }

    match event {
        SubmissionEvent::Approve => {
            submission.approved_at = Some(now.clone());
            submission.approved_by = Some(actor.to_string());
        }
        SubmissionEvent::Reopen => {
            submission.reopened_at = Some(now.clone());
            submission.reopened_by = Some(actor.to_string());
        }
        SubmissionEvent::Discard => {
            submission.discarded_at = Some(now.clone());
            submission.discarded_by = Some(actor.to_string());
        }
    }
    submission.status = next;
    submission.updated_at = now;
    Ok(true)
}

/// Approve, reopen, edit and discard operations on submissions.
pub struct Lifecycle {
    store: Arc<Store>,
}

impl Lifecycle {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn ensure_approver(actor: &Actor) -> Result<()> {
        if !actor.can_approve() {
            return Err(Forbidden::NotApprover(actor.id.clone()).into());
        }
        Ok(())
    }

    fn live_in(tx: &Tx<'_>, scope: &PeriodScope) -> TxResult<Submission> {
        tx.live_submission(scope)?.ok_or_else(|| {
            abort_with(NotFound::LiveSubmission {
                org: scope.org.clone(),
                period: scope.period.clone(),
            })
        })
    }

    /// Lock the period's open submission. Approving a locked submission
    /// returns it untouched.
    pub fn approve(&self, scope: &PeriodScope, actor: &Actor) -> Result<Submission> {
        Self::ensure_approver(actor)?;

        let (submission, changed) = self.store.transact("approve", |tx| {
            let mut submission = Self::live_in(tx, scope)?;
            let changed =
                apply_submission_event(&mut submission, SubmissionEvent::Approve, &actor.id, TimeStamp::new())
                    .map_err(abort_with)?;
            if changed {
                tx.put_submission(&submission)?;
            }
            Ok((submission, changed))
        })?;

        if changed {
            info!(submission = %submission.id, approver = %actor.id, "submission locked");
        } else {
            debug!(submission = %submission.id, "approve on locked submission is a no-op");
        }
        Ok(submission)
    }

    /// Archive the live submission and hand editing back to a draft owned by
    /// the original submitter, together with its files.
    pub fn reopen(&self, scope: &PeriodScope, actor: &Actor) -> Result<Draft> {
        Self::ensure_approver(actor)?;

        let (draft, copied) = self.store.transact("reopen", |tx| Self::reopen_in(tx, scope, actor))?;
        match copied {
            Some(copied) => info!(
                draft = %draft.id,
                version = draft.version,
                files = copied,
                reopened_by = %actor.id,
                "submission reopened"
            ),
            None => debug!(draft = %draft.id, "reopen already committed, returning draft"),
        }
        Ok(draft)
    }

    fn reopen_in(tx: &Tx<'_>, scope: &PeriodScope, actor: &Actor) -> TxResult<(Draft, Option<usize>)> {
        let target = match tx.live_submission(scope)? {
            Some(live) => Some(live),
            None => Self::legacy_submitted(tx, scope)?,
        };
        let Some(mut submission) = target else {
            if let Some(draft) = Self::committed_reopen(tx, scope)? {
                return Ok((draft, None));
            }
            return Err(abort_with(NotFound::LiveSubmission {
                org: scope.org.clone(),
                period: scope.period.clone(),
            }));
        };

        let now = TimeStamp::new();
        let owner = DraftKey::new(
            submission.org.clone(),
            submission.submitted_by.clone(),
            submission.period.clone(),
        );

        let draft = match tx.draft(&owner, &submission.source_draft_id)? {
            Some(mut draft)
                if draft.status == DraftStatus::Archived
                    && draft.submitted_as_submission_id.as_deref() == Some(submission.id.as_str()) =>
            {
                apply_draft_event(
                    &mut draft,
                    DraftEvent::Resurrect {
                        submission_id: &submission.id,
                    },
                    &actor.id,
                    now.clone(),
                )
                .map_err(abort_with)?;
                // the submission is authoritative: it may have been edited while open
                draft.responses = submission.responses.clone();
                draft.total_questions = submission.total_questions;
                draft.completed = submission.completed;
                draft
            }
            _ => {
                let version = VersionAllocator::next_in(tx, &owner)?;
                let mut draft =
                    Draft::seeded_from(new_row_id(DRAFT_HRP), &submission, version, now.clone());
                draft.reopened_at = Some(now.clone());
                draft.reopened_by = Some(actor.id.clone());
                draft.reopened_from_submission_id = Some(submission.id.clone());
                draft
            }
        };

        if let InsertOutcome::Conflict { existing_id } = tx.claim_active_draft(&owner, &draft.id)? {
            return Err(abort_with(Conflict::ActiveDraftExists {
                actor: owner.actor.clone(),
                draft_id: existing_id,
            }));
        }
        tx.put_draft(&draft)?;

        let copied = Snapshotter::copy_back_in(tx, &submission)?;

        apply_submission_event(&mut submission, SubmissionEvent::Reopen, &actor.id, now)
            .map_err(abort_with)?;
        tx.put_submission(&submission)?;
        tx.release_live_submission(scope)?;

        Ok((draft, Some(copied)))
    }

    /// A legacy SUBMITTED row that is still the period's latest submission.
    /// It never held the live slot but can be reopened like one.
    fn legacy_submitted(tx: &Tx<'_>, scope: &PeriodScope) -> TxResult<Option<Submission>> {
        let Some(latest_id) = tx.latest_submission_id(scope)? else {
            return Ok(None);
        };
        Ok(tx
            .submission(scope, &latest_id)?
            .filter(|s| s.status == SubmissionStatus::LegacySubmitted))
    }

    /// The draft produced by an already committed reopen of the period's
    /// latest submission, if it is still the owner's active draft.
    fn committed_reopen(tx: &Tx<'_>, scope: &PeriodScope) -> TxResult<Option<Draft>> {
        let Some(latest_id) = tx.latest_submission_id(scope)? else {
            return Ok(None);
        };
        let Some(latest) = tx.submission(scope, &latest_id)? else {
            return Ok(None);
        };
        if latest.status != SubmissionStatus::Archived || latest.reopened_at.is_none() {
            return Ok(None);
        }
        let owner = DraftKey::new(
            latest.org.clone(),
            latest.submitted_by.clone(),
            latest.period.clone(),
        );
        Ok(tx
            .active_draft(&owner)?
            .filter(|d| d.reopened_from_submission_id.as_deref() == Some(latest.id.as_str())))
    }

    /// Edit the live submission's answers; only allowed while it is OPEN.
    pub fn edit_submission(&self, scope: &PeriodScope, patch: &DraftPatch) -> Result<Submission> {
        let submission = self.store.transact("edit_submission", |tx| {
            let mut submission = Self::live_in(tx, scope)?;
            match submission.status {
                SubmissionStatus::Open => {}
                SubmissionStatus::Locked => {
                    return Err(abort_with(Forbidden::SubmissionLocked(submission.id.clone())));
                }
                other => return Err(abort_with(rejected(other, "edit"))),
            }
            submission.apply_patch(patch, TimeStamp::new());
            tx.put_submission(&submission)?;
            Ok(submission)
        })?;

        info!(submission = %submission.id, "submission edited");
        Ok(submission)
    }

    /// Discard a legacy DRAFT-status submission row.
    pub fn discard(&self, scope: &PeriodScope, submission_id: &str, actor: &Actor) -> Result<Submission> {
        let submission = self.store.transact("discard", |tx| {
            let mut submission = tx
                .submission(scope, submission_id)?
                .ok_or_else(|| abort_with(NotFound::Submission(submission_id.to_string())))?;
            apply_submission_event(&mut submission, SubmissionEvent::Discard, &actor.id, TimeStamp::new())
                .map_err(abort_with)?;
            tx.put_submission(&submission)?;
            Ok(submission)
        })?;

        info!(submission = %submission.id, discarded_by = %actor.id, "legacy submission discarded");
        Ok(submission)
    }

    /// The period's submission chain, newest first.
    pub fn history(&self, scope: &PeriodScope) -> Result<Vec<Submission>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.store.read_latest_submission(scope)?;

        while let Some(submission) = cursor {
            if !seen.insert(submission.id.clone()) {
                break;
            }
            cursor = match &submission.parent_submission_id {
                Some(parent) => self.store.read_submission(scope, parent)?,
                None => None,
            };
            chain.push(submission);
        }
        Ok(chain)
    }
}
