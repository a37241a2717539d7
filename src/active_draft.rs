//! The single open draft per (organization, actor, period).
//!
//! Writes follow an insert-first protocol: try to claim the tuple's unique
//! active-draft slot with a brand new row, and when the slot is already held
//! (`InsertOutcome::Conflict`) merge the patch into the holder instead. A
//! concurrent writer that raced us to the slot makes sled re-run our closure,
//! which then lands in the merge branch, so no caller ever sees the race.

use super::draft::Draft;
use super::error::{Conflict, NotFound, Result};
use super::lifecycle::{DraftEvent, apply_draft_event};
use super::snapshot::Snapshotter;
use super::store::{InsertOutcome, Store, Tx, TxResult, abort_with};
use super::submission::Submission;
use super::types::{DraftKey, DraftPatch, PeriodScope, TimeStamp};
use super::utils::{DRAFT_HRP, new_row_id};
use super::version::VersionAllocator;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ActiveDraftStore {
    store: Arc<Store>,
}

impl ActiveDraftStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get_active_draft(&self, key: &DraftKey) -> Result<Option<Draft>> {
        self.store.read_active_draft(key)
    }

    /// Every draft row of the tuple, archived ones included.
    pub fn list_drafts(&self, key: &DraftKey) -> Result<Vec<Draft>> {
        self.store.list_drafts(key)
    }

    /// Update the active draft in place, creating it at the next version when
    /// the tuple has none.
    pub fn upsert_active_draft(&self, key: &DraftKey, patch: &DraftPatch) -> Result<Draft> {
        let (draft, inserted) = self
            .store
            .transact("upsert_active_draft", |tx| Self::upsert_in(tx, key, patch))?;

        if inserted {
            info!(draft = %draft.id, version = draft.version, actor = %key.actor, "draft created");
        } else {
            debug!(draft = %draft.id, version = draft.version, "draft updated in place");
        }
        Ok(draft)
    }

    fn upsert_in(tx: &Tx<'_>, key: &DraftKey, patch: &DraftPatch) -> TxResult<(Draft, bool)> {
        ensure_no_live_submission(tx, &key.scope())?;
        let now = TimeStamp::new();
        let candidate_id = new_row_id(DRAFT_HRP);

        match tx.claim_active_draft(key, &candidate_id)? {
            InsertOutcome::Inserted => {
                let version = VersionAllocator::next_in(tx, key)?;
                let mut draft = Draft::new(candidate_id, key, version, now.clone());
                draft.apply_patch(patch, now);
                tx.put_draft(&draft)?;
                Ok((draft, true))
            }
            InsertOutcome::Conflict { existing_id } => {
                let mut draft = tx
                    .draft(key, &existing_id)?
                    .ok_or_else(|| abort_with(NotFound::Draft(existing_id.clone())))?;
                draft.apply_patch(patch, now);
                tx.put_draft(&draft)?;
                Ok((draft, false))
            }
        }
    }

    /// Archive the active draft (if any) and open a new one at the next
    /// version, optionally pre-filled from `seed`.
    pub fn start_fresh(
        &self,
        key: &DraftKey,
        seed: Option<&DraftPatch>,
    ) -> Result<Draft> {
        let (draft, superseded) = self.store.transact("start_fresh", |tx| {
            ensure_no_live_submission(tx, &key.scope())?;
            let now = TimeStamp::new();

            let mut superseded = None;
            if let Some(mut previous) = tx.active_draft(key)? {
                apply_draft_event(&mut previous, DraftEvent::Discard, &key.actor, now.clone())
                    .map_err(abort_with)?;
                tx.put_draft(&previous)?;
                superseded = Some(previous.id);
            }

            let version = VersionAllocator::next_in(tx, key)?;
            let mut draft = Draft::new(new_row_id(DRAFT_HRP), key, version, now.clone());
            if let Some(seed) = seed {
                draft.apply_patch(seed, now);
            }
            tx.release_active_draft(key)?;
            if let InsertOutcome::Conflict { existing_id } = tx.claim_active_draft(key, &draft.id)? {
                return Err(abort_with(Conflict::ActiveDraftExists {
                    actor: key.actor.clone(),
                    draft_id: existing_id,
                }));
            }
            tx.put_draft(&draft)?;
            Ok((draft, superseded))
        })?;

        info!(
            draft = %draft.id,
            version = draft.version,
            superseded = ?superseded,
            "started fresh draft"
        );
        Ok(draft)
    }

    /// Freeze the active draft into an OPEN submission and archive it.
    /// Retrying after a committed submit returns the submission it produced.
    pub fn submit_draft(&self, key: &DraftKey) -> Result<Submission> {
        let (submission, created) = self
            .store
            .transact("submit_draft", |tx| Self::submit_in(tx, key))?;

        if created {
            info!(
                submission = %submission.id,
                source_draft = %submission.source_draft_id,
                version = submission.version,
                "draft submitted"
            );
        } else {
            debug!(submission = %submission.id, "submit already committed");
        }
        Ok(submission)
    }

    fn submit_in(tx: &Tx<'_>, key: &DraftKey) -> TxResult<(Submission, bool)> {
        let scope = key.scope();

        if let Some(live) = tx.live_submission(&scope)? {
            if live.submitted_by == key.actor {
                let source = tx.draft(key, &live.source_draft_id)?;
                if source.is_some_and(|d| d.submitted_as_submission_id.as_deref() == Some(live.id.as_str()))
                    && tx.active_draft(key)?.is_none()
                {
                    return Ok((live, false));
                }
            }
            return Err(abort_with(Conflict::SubmissionExists {
                org: scope.org,
                period: scope.period,
                submission_id: live.id,
            }));
        }

        let draft = tx.active_draft(key)?.ok_or_else(|| {
            abort_with(NotFound::ActiveDraft {
                org: key.org.clone(),
                actor: key.actor.clone(),
                period: key.period.clone(),
            })
        })?;

        Ok((Snapshotter::freeze_in(tx, draft)?, true))
    }
}

/// Drafts cannot be created or edited while the period has a reviewable
/// submission; the resolver would hide them behind it.
fn ensure_no_live_submission(tx: &Tx<'_>, scope: &PeriodScope) -> TxResult<()> {
    if let Some(live) = tx.live_submission(scope)? {
        return Err(abort_with(Conflict::SubmissionExists {
            org: scope.org.clone(),
            period: scope.period.clone(),
            submission_id: live.id,
        }));
    }
    Ok(())
}
