//! Freezing drafts into submissions, with their file metadata.
//!
//! Snapshotting copies upload rows rather than moving them: the draft side
//! keeps its rows and the submission gets `is_snapshot` copies pointing back
//! at the original upload. Only metadata is touched here; object bytes stay
//! where the storage collaborator put them.

use super::draft::Draft;
use super::error::{Conflict, NotFound, Result};
use super::lifecycle::{DraftEvent, apply_draft_event, rejected};
use super::store::{InsertOutcome, Store, Tx, TxResult, abort_with};
use super::submission::{Submission, SubmissionStatus};
use super::types::{DraftKey, PeriodScope, TimeStamp, UploadMeta};
use super::upload::Upload;
use super::utils::{SUBMISSION_HRP, UPLOAD_HRP, new_row_id};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Snapshotter {
    store: Arc<Store>,
}

impl Snapshotter {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Submit `draft`, which must still be its tuple's active draft: an OPEN
    /// submission is created with file snapshots and the draft is archived,
    /// all in one transaction.
    pub fn snapshot(&self, draft: &Draft) -> Result<Submission> {
        let submission = self.store.transact("snapshot", |tx| {
            let key = draft.key();
            match tx.active_draft(&key)? {
                Some(active) if active.id == draft.id => Self::freeze_in(tx, active),
                Some(active) => Err(abort_with(Conflict::ActiveDraftExists {
                    actor: key.actor.clone(),
                    draft_id: active.id,
                })),
                None => Err(abort_with(NotFound::ActiveDraft {
                    org: key.org.clone(),
                    actor: key.actor.clone(),
                    period: key.period.clone(),
                })),
            }
        })?;
        info!(submission = %submission.id, draft = %draft.id, "draft snapshotted");
        Ok(submission)
    }

    /// Copy a reopened submission's file snapshots back to the draft side.
    /// Safe to run repeatedly: rows whose original upload is already present
    /// are skipped. Only an ARCHIVED submission whose reopen produced the
    /// owner's current active draft qualifies.
    pub fn copy_back(&self, submission: &Submission) -> Result<usize> {
        let copied = self.store.transact("copy_back", |tx| {
            let scope = submission.scope();
            let stored = tx
                .submission(&scope, &submission.id)?
                .ok_or_else(|| abort_with(NotFound::Submission(submission.id.clone())))?;
            if stored.status != SubmissionStatus::Archived || stored.reopened_at.is_none() {
                return Err(abort_with(rejected(stored.status, "copy back files of")));
            }
            let owner = DraftKey::new(
                stored.org.clone(),
                stored.submitted_by.clone(),
                stored.period.clone(),
            );
            let reopened_into = tx.active_draft(&owner)?.is_some_and(|draft| {
                draft.reopened_from_submission_id.as_deref() == Some(stored.id.as_str())
            });
            if !reopened_into {
                return Err(abort_with(NotFound::ActiveDraft {
                    org: owner.org,
                    actor: owner.actor,
                    period: owner.period,
                }));
            }
            Self::copy_back_in(tx, &stored)
        })?;
        info!(submission = %submission.id, copied, "files copied back to draft side");
        Ok(copied)
    }

    /// Register metadata of an upload that completed against the draft side.
    pub fn record_upload(&self, key: &DraftKey, meta: &UploadMeta) -> Result<Upload> {
        let upload = self.store.transact("record_upload", |tx| {
            if tx.active_draft(key)?.is_none() {
                return Err(abort_with(NotFound::ActiveDraft {
                    org: key.org.clone(),
                    actor: key.actor.clone(),
                    period: key.period.clone(),
                }));
            }
            let scope = key.scope();
            let upload = Upload::from_meta(new_row_id(UPLOAD_HRP), key, meta, TimeStamp::new());
            tx.insert_upload(&upload)?;
            let mut ids = tx.draft_file_ids(&scope)?;
            ids.push(upload.id.clone());
            tx.set_draft_file_ids(&scope, &ids)?;
            Ok(upload)
        })?;
        info!(upload = %upload.id, category = %upload.category, "upload recorded");
        Ok(upload)
    }

    pub fn draft_files(&self, scope: &PeriodScope) -> Result<Vec<Upload>> {
        self.store.read_draft_files(scope)
    }

    pub fn submission_files(&self, submission_id: &str) -> Result<Vec<Upload>> {
        self.store.read_submission_files(submission_id)
    }

    /// Snapshot `draft` and archive it as submitted. The caller has checked
    /// that `draft` is the tuple's active draft.
    pub(crate) fn freeze_in(tx: &Tx<'_>, mut draft: Draft) -> TxResult<Submission> {
        let key = draft.key();
        let submission = Self::snapshot_in(tx, &draft)?;
        apply_draft_event(
            &mut draft,
            DraftEvent::Submit {
                submission_id: &submission.id,
            },
            &key.actor,
            submission.submitted_at.clone(),
        )
        .map_err(abort_with)?;
        tx.put_draft(&draft)?;
        tx.release_active_draft(&key)?;
        Ok(submission)
    }

    fn snapshot_in(tx: &Tx<'_>, draft: &Draft) -> TxResult<Submission> {
        let scope = PeriodScope::new(draft.org.clone(), draft.period.clone());
        let now = TimeStamp::new();
        let id = new_row_id(SUBMISSION_HRP);

        if let InsertOutcome::Conflict { existing_id } = tx.claim_live_submission(&scope, &id)? {
            return Err(abort_with(Conflict::SubmissionExists {
                org: scope.org.clone(),
                period: scope.period.clone(),
                submission_id: existing_id,
            }));
        }

        let mut parent = None;
        if let Some(previous_id) = tx.latest_submission_id(&scope)? {
            if let Some(mut previous) = tx.submission(&scope, &previous_id)? {
                previous.is_latest = false;
                tx.put_submission(&previous)?;
                parent = Some(previous_id);
            }
        }

        let submission = Submission::from_draft(id, draft, parent, now.clone());

        let draft_ids = tx.draft_file_ids(&scope)?;
        let mut snapshot_ids = Vec::with_capacity(draft_ids.len());
        for (batch_no, batch) in draft_ids.chunks(tx.batch_size()).enumerate() {
            tx.check_deadline()?;
            for upload_id in batch {
                let upload = tx
                    .upload(upload_id)?
                    .ok_or_else(|| abort_with(NotFound::Upload(upload_id.clone())))?;
                let copy = upload.snapshot_for(new_row_id(UPLOAD_HRP), &submission.id, now.clone());
                tx.insert_upload(&copy)?;
                snapshot_ids.push(copy.id);
            }
            debug!(batch = batch_no, rows = batch.len(), "snapshot batch duplicated");
        }

        tx.set_submission_file_ids(&submission.id, &snapshot_ids)?;
        tx.put_submission(&submission)?;
        tx.set_latest_submission(&scope, &submission.id)?;
        Ok(submission)
    }

    pub(crate) fn copy_back_in(tx: &Tx<'_>, submission: &Submission) -> TxResult<usize> {
        let scope = submission.scope();
        let now = TimeStamp::new();
        let snapshot_ids = tx.submission_file_ids(&submission.id)?;
        let mut draft_ids = tx.draft_file_ids(&scope)?;

        let mut origins = HashSet::new();
        let mut hashes = HashSet::new();
        for id in &draft_ids {
            if let Some(upload) = tx.upload(id)? {
                origins.insert(upload.origin_id().to_string());
                hashes.insert(upload.content_hash);
            }
        }

        let mut copied = 0;
        for batch in snapshot_ids.chunks(tx.batch_size()) {
            tx.check_deadline()?;
            for snapshot_id in batch {
                let snapshot = tx
                    .upload(snapshot_id)?
                    .ok_or_else(|| abort_with(NotFound::Upload(snapshot_id.clone())))?;
                if origins.contains(snapshot.origin_id()) || hashes.contains(&snapshot.content_hash) {
                    continue;
                }
                let copy = snapshot.draft_copy(new_row_id(UPLOAD_HRP), now.clone());
                tx.insert_upload(&copy)?;
                origins.insert(copy.origin_id().to_string());
                hashes.insert(copy.content_hash.clone());
                draft_ids.push(copy.id);
                copied += 1;
            }
        }

        if copied > 0 {
            tx.set_draft_file_ids(&scope, &draft_ids)?;
        }
        Ok(copied)
    }
}
