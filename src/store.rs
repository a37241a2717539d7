//! sled-backed tables for drafts, submissions and upload metadata.
//!
//! Rows live under table prefixes (`draft/`, `submission/`, `upload/`), with key
//! segments hex-encoded so caller-supplied ids can never collide with the `/`
//! separator. Uniqueness constraints are index keys under `idx/` written in the
//! same transaction as the rows they guard:
//!
//! - `idx/active-draft/<org>/<period>/<actor>`: at most one DRAFT row per tuple
//! - `idx/live-submission/<org>/<period>`: at most one OPEN/LOCKED submission
//!
//! sled transactions are serializable: two writers touching the same index key
//! cannot both commit, and the loser's closure is re-run against the winner's
//! state. Closures must therefore be free of side effects outside the tree.

use super::config::PortalConfig;
use super::draft::{Draft, DraftStatus};
use super::error::{Conflict, Forbidden, LifecycleError, NotFound, Result};
use super::submission::Submission;
use super::types::{DraftKey, PeriodScope};
use super::upload::Upload;
use super::version::VersionAllocator;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub(crate) type TxResult<T> = std::result::Result<T, ConflictableTransactionError<LifecycleError>>;

/// Abort the running transaction with a lifecycle error.
pub(crate) fn abort_with(err: impl Into<LifecycleError>) -> ConflictableTransactionError<LifecycleError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Result of trying to claim a unique index slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    /// The slot is held by another live row; the caller decides whether to
    /// merge into it or fail.
    Conflict { existing_id: String },
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        PortalConfig::default().into()
    }
}

impl From<&PortalConfig> for StoreSettings {
    fn from(config: &PortalConfig) -> Self {
        Self {
            timeout: config.transaction.timeout(),
            batch_size: config.snapshot.batch_size.max(1),
        }
    }
}

impl From<PortalConfig> for StoreSettings {
    fn from(config: PortalConfig) -> Self {
        (&config).into()
    }
}

fn table_key(table: &str, segments: &[&str]) -> Vec<u8> {
    let mut key = table.as_bytes().to_vec();
    for segment in segments {
        key.push(b'/');
        key.extend_from_slice(hex::encode(segment).as_bytes());
    }
    key
}

fn table_prefix(table: &str, segments: &[&str]) -> Vec<u8> {
    let mut prefix = table_key(table, segments);
    prefix.push(b'/');
    prefix
}

fn draft_key(key: &DraftKey, id: &str) -> Vec<u8> {
    table_key("draft", &[&key.org, &key.period, &key.actor, id])
}

fn submission_key(scope: &PeriodScope, id: &str) -> Vec<u8> {
    table_key("submission", &[&scope.org, &scope.period, id])
}

fn upload_key(id: &str) -> Vec<u8> {
    table_key("upload", &[id])
}

fn active_draft_index(key: &DraftKey) -> Vec<u8> {
    table_key("idx/active-draft", &[&key.org, &key.period, &key.actor])
}

fn live_submission_index(scope: &PeriodScope) -> Vec<u8> {
    table_key("idx/live-submission", &[&scope.org, &scope.period])
}

fn latest_submission_index(scope: &PeriodScope) -> Vec<u8> {
    table_key("idx/latest-submission", &[&scope.org, &scope.period])
}

fn draft_files_index(scope: &PeriodScope) -> Vec<u8> {
    table_key("idx/draft-files", &[&scope.org, &scope.period])
}

fn submission_files_index(submission_id: &str) -> Vec<u8> {
    table_key("idx/submission-files", &[submission_id])
}

pub(crate) fn version_mark_key(key: &DraftKey) -> Vec<u8> {
    table_key("idx/version", &[&key.org, &key.period, &key.actor])
}

fn decode_row<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn decode_id(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| LifecycleError::Codec("index entry is not utf-8".to_string()))
}

/// View of the tree inside one transaction attempt.
pub(crate) struct Tx<'a> {
    tree: &'a TransactionalTree,
    op: &'static str,
    // None when the timeout lies beyond what `Instant` can represent
    deadline: Option<Instant>,
    timeout_ms: u64,
    batch_size: usize,
}

impl Tx<'_> {
    /// Abort with `Timeout` once the operation's deadline has passed.
    pub fn check_deadline(&self) -> TxResult<()> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(abort_with(LifecycleError::Timeout {
                op: self.op,
                timeout_ms: self.timeout_ms,
            }));
        }
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn get<T>(&self, key: &[u8]) -> TxResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tree.get(key)? {
            Some(bytes) => decode_row(&bytes).map(Some).map_err(abort_with),
            None => Ok(None),
        }
    }

    pub fn put<T: minicbor::Encode<()>>(&self, key: &[u8], value: &T) -> TxResult<()> {
        let bytes = minicbor::to_vec(value).map_err(abort_with)?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    fn get_id(&self, key: &[u8]) -> TxResult<Option<String>> {
        match self.tree.get(key)? {
            Some(bytes) => decode_id(&bytes).map(Some).map_err(abort_with),
            None => Ok(None),
        }
    }

    fn put_id(&self, key: &[u8], id: &str) -> TxResult<()> {
        self.tree.insert(key, id.as_bytes())?;
        Ok(())
    }

    // drafts

    pub fn draft(&self, key: &DraftKey, id: &str) -> TxResult<Option<Draft>> {
        self.get(&draft_key(key, id))
    }

    pub fn put_draft(&self, draft: &Draft) -> TxResult<()> {
        let key = draft.key();
        VersionAllocator::observe_in(self, &key, draft.version)?;
        self.put(&draft_key(&key, &draft.id), draft)
    }

    pub fn active_draft_id(&self, key: &DraftKey) -> TxResult<Option<String>> {
        self.get_id(&active_draft_index(key))
    }

    pub fn active_draft(&self, key: &DraftKey) -> TxResult<Option<Draft>> {
        match self.active_draft_id(key)? {
            Some(id) => Ok(self.draft(key, &id)?.filter(Draft::is_active)),
            None => Ok(None),
        }
    }

    /// Claim the tuple's active-draft slot for `id`. A slot pointing at a row
    /// that is missing or no longer DRAFT is stale and gets reclaimed.
    pub fn claim_active_draft(&self, key: &DraftKey, id: &str) -> TxResult<InsertOutcome> {
        if let Some(existing_id) = self.active_draft_id(key)? {
            let live = self
                .draft(key, &existing_id)?
                .is_some_and(|d| d.status == DraftStatus::Draft);
            if live && existing_id != id {
                return Ok(InsertOutcome::Conflict { existing_id });
            }
        }
        self.put_id(&active_draft_index(key), id)?;
        Ok(InsertOutcome::Inserted)
    }

    pub fn release_active_draft(&self, key: &DraftKey) -> TxResult<()> {
        self.tree.remove(active_draft_index(key))?;
        Ok(())
    }

    // submissions

    pub fn submission(&self, scope: &PeriodScope, id: &str) -> TxResult<Option<Submission>> {
        self.get(&submission_key(scope, id))
    }

    pub fn put_submission(&self, submission: &Submission) -> TxResult<()> {
        let key = DraftKey::new(
            submission.org.clone(),
            submission.submitted_by.clone(),
            submission.period.clone(),
        );
        VersionAllocator::observe_in(self, &key, submission.version)?;
        self.put(&submission_key(&submission.scope(), &submission.id), submission)
    }

    pub fn live_submission_id(&self, scope: &PeriodScope) -> TxResult<Option<String>> {
        self.get_id(&live_submission_index(scope))
    }

    pub fn live_submission(&self, scope: &PeriodScope) -> TxResult<Option<Submission>> {
        match self.live_submission_id(scope)? {
            Some(id) => Ok(self.submission(scope, &id)?.filter(|s| s.status.is_live())),
            None => Ok(None),
        }
    }

    pub fn claim_live_submission(&self, scope: &PeriodScope, id: &str) -> TxResult<InsertOutcome> {
        if let Some(existing_id) = self.live_submission_id(scope)? {
            let live = self
                .submission(scope, &existing_id)?
                .is_some_and(|s| s.status.is_live());
            if live && existing_id != id {
                return Ok(InsertOutcome::Conflict { existing_id });
            }
        }
        self.put_id(&live_submission_index(scope), id)?;
        Ok(InsertOutcome::Inserted)
    }

    pub fn release_live_submission(&self, scope: &PeriodScope) -> TxResult<()> {
        self.tree.remove(live_submission_index(scope))?;
        Ok(())
    }

    pub fn latest_submission_id(&self, scope: &PeriodScope) -> TxResult<Option<String>> {
        self.get_id(&latest_submission_index(scope))
    }

    pub fn set_latest_submission(&self, scope: &PeriodScope, id: &str) -> TxResult<()> {
        self.put_id(&latest_submission_index(scope), id)
    }

    // uploads

    pub fn upload(&self, id: &str) -> TxResult<Option<Upload>> {
        self.get(&upload_key(id))
    }

    /// Write a new upload row. Snapshot rows are never overwritten.
    pub fn insert_upload(&self, upload: &Upload) -> TxResult<()> {
        if let Some(existing) = self.upload(&upload.id)? {
            if existing.is_snapshot {
                return Err(abort_with(Forbidden::SnapshotImmutable(existing.id)));
            }
        }
        self.put(&upload_key(&upload.id), upload)
    }

    pub fn draft_file_ids(&self, scope: &PeriodScope) -> TxResult<Vec<String>> {
        Ok(self.get(&draft_files_index(scope))?.unwrap_or_default())
    }

    pub fn set_draft_file_ids(&self, scope: &PeriodScope, ids: &Vec<String>) -> TxResult<()> {
        self.put(&draft_files_index(scope), ids)
    }

    pub fn submission_file_ids(&self, submission_id: &str) -> TxResult<Vec<String>> {
        Ok(self.get(&submission_files_index(submission_id))?.unwrap_or_default())
    }

    pub fn set_submission_file_ids(&self, submission_id: &str, ids: &Vec<String>) -> TxResult<()> {
        self.put(&submission_files_index(submission_id), ids)
    }
}

/// Storage handle shared by every component.
pub struct Store {
    instance: Arc<sled::Db>,
    settings: StoreSettings,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>, settings: StoreSettings) -> Self {
        Self { instance, settings }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Run `f` inside one serializable transaction bounded by the configured
    /// timeout. Either everything `f` wrote commits or nothing does.
    pub(crate) fn transact<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(&Tx<'_>) -> TxResult<T>,
    {
        let deadline = Instant::now().checked_add(self.settings.timeout);
        let timeout_ms = u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX);
        let attempts = Cell::new(0u32);

        let result = self.instance.transaction(|tree| {
            attempts.set(attempts.get() + 1);
            if attempts.get() > 1 {
                debug!(op, attempt = attempts.get(), "retrying after conflicting commit");
            }
            let tx = Tx {
                tree,
                op,
                deadline,
                timeout_ms,
                batch_size: self.settings.batch_size,
            };
            tx.check_deadline()?;
            f(&tx)
        });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => {
                if err.is_retryable() {
                    warn!(op, attempts = attempts.get(), "transaction timed out and rolled back");
                }
                Err(err)
            }
            Err(TransactionError::Storage(err)) => {
                error!(op, error = %err, "storage failure, transaction rolled back");
                Err(err.into())
            }
        }
    }

    fn read<T>(&self, key: &[u8]) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.instance.get(key)? {
            Some(bytes) => decode_row(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_id(&self, key: &[u8]) -> Result<Option<String>> {
        match self.instance.get(key)? {
            Some(bytes) => decode_id(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn scan<T>(&self, prefix: &[u8]) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.instance
            .scan_prefix(prefix)
            .map(|entry| {
                let (_, bytes) = entry?;
                decode_row(&bytes)
            })
            .collect()
    }

    pub fn read_draft(&self, key: &DraftKey, id: &str) -> Result<Option<Draft>> {
        self.read(&draft_key(key, id))
    }

    /// Lock-free read of the tuple's active draft.
    pub fn read_active_draft(&self, key: &DraftKey) -> Result<Option<Draft>> {
        match self.read_id(&active_draft_index(key))? {
            Some(id) => Ok(self.read_draft(key, &id)?.filter(Draft::is_active)),
            None => Ok(None),
        }
    }

    /// Every draft row of the tuple, oldest version first.
    pub fn list_drafts(&self, key: &DraftKey) -> Result<Vec<Draft>> {
        let mut drafts: Vec<Draft> =
            self.scan(&table_prefix("draft", &[&key.org, &key.period, &key.actor]))?;
        drafts.sort_by(|a, b| a.version.cmp(&b.version).then(a.created_at.cmp(&b.created_at)));
        Ok(drafts)
    }

    pub fn read_submission(&self, scope: &PeriodScope, id: &str) -> Result<Option<Submission>> {
        self.read(&submission_key(scope, id))
    }

    /// Lock-free read of the period's OPEN or LOCKED submission.
    pub fn read_live_submission(&self, scope: &PeriodScope) -> Result<Option<Submission>> {
        match self.read_id(&live_submission_index(scope))? {
            Some(id) => Ok(self.read_submission(scope, &id)?.filter(|s| s.status.is_live())),
            None => Ok(None),
        }
    }

    pub fn read_latest_submission(&self, scope: &PeriodScope) -> Result<Option<Submission>> {
        match self.read_id(&latest_submission_index(scope))? {
            Some(id) => self.read_submission(scope, &id),
            None => Ok(None),
        }
    }

    /// Every submission row of the period, in no particular order.
    pub fn list_submissions(&self, scope: &PeriodScope) -> Result<Vec<Submission>> {
        self.scan(&table_prefix("submission", &[&scope.org, &scope.period]))
    }

    pub fn read_upload(&self, id: &str) -> Result<Option<Upload>> {
        self.read(&upload_key(id))
    }

    fn read_uploads(&self, ids: Vec<String>) -> Result<Vec<Upload>> {
        ids.iter()
            .map(|id| {
                self.read_upload(id)?
                    .ok_or_else(|| LifecycleError::from(NotFound::Upload(id.clone())))
            })
            .collect()
    }

    pub fn read_draft_files(&self, scope: &PeriodScope) -> Result<Vec<Upload>> {
        let ids: Vec<String> = self.read(&draft_files_index(scope))?.unwrap_or_default();
        self.read_uploads(ids)
    }

    pub fn read_submission_files(&self, submission_id: &str) -> Result<Vec<Upload>> {
        let ids: Vec<String> = self
            .read(&submission_files_index(submission_id))?
            .unwrap_or_default();
        self.read_uploads(ids)
    }

    /// Load a submission row written by an older deployment, keeping its
    /// status. Live rows still have to win the period's live slot.
    pub fn import_submission(&self, submission: &Submission) -> Result<()> {
        self.transact("import_submission", |tx| {
            let scope = submission.scope();
            if submission.status.is_live() {
                if let InsertOutcome::Conflict { existing_id } =
                    tx.claim_live_submission(&scope, &submission.id)?
                {
                    return Err(abort_with(Conflict::SubmissionExists {
                        org: scope.org.clone(),
                        period: scope.period.clone(),
                        submission_id: existing_id,
                    }));
                }
            }
            if submission.is_latest {
                tx.set_latest_submission(&scope, &submission.id)?;
            }
            tx.put_submission(submission)
        })
    }

    pub fn flush(&self) -> Result<usize> {
        Ok(self.instance.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_segments_cannot_collide_across_separators() {
        let a = table_key("draft", &["a/b", "c"]);
        let b = table_key("draft", &["a", "b/c"]);
        assert_ne!(a, b);
        assert!(a.starts_with(b"draft/"));
    }

    #[test]
    fn tuple_prefix_does_not_match_longer_actor_ids() {
        let key = DraftKey::new("A", "U1", "2025-Q1");
        let other = DraftKey::new("A", "U10", "2025-Q1");
        let prefix = table_prefix("draft", &[&key.org, &key.period, &key.actor]);
        assert!(draft_key(&key, "draft_x").starts_with(&prefix));
        assert!(!draft_key(&other, "draft_x").starts_with(&prefix));
    }

    #[test]
    fn snapshot_rows_are_never_overwritten() {
        use crate::types::{TimeStamp, UploadMeta};

        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("portal.db")).unwrap());
        let store = Store::new(db, StoreSettings::default());
        let key = DraftKey::new("A", "U1", "2025-Q1");
        let meta = UploadMeta {
            category: "evidence".into(),
            object_key: "a.pdf".into(),
            size: 1,
            content_type: "application/pdf".into(),
            storage_ref: "s3://b/a.pdf".into(),
        };
        let original = Upload::from_meta("upload_a".into(), &key, &meta, TimeStamp::new());
        let snapshot = original.snapshot_for("upload_s".into(), "sub_1", TimeStamp::new());

        store
            .transact("seed", |tx| {
                tx.insert_upload(&original)?;
                tx.insert_upload(&snapshot)
            })
            .unwrap();

        let mut tampered = snapshot.clone();
        tampered.size = 2;
        let err = store
            .transact("tamper", |tx| tx.insert_upload(&tampered))
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Forbidden(Forbidden::SnapshotImmutable(_))
        ));
        assert_eq!(store.read_upload("upload_s").unwrap(), Some(snapshot));

        // draft-side rows may be rewritten
        store
            .transact("rewrite", |tx| tx.insert_upload(&original))
            .unwrap();
    }

    #[test]
    fn timeout_reports_saturated_milliseconds() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("portal.db")).unwrap());
        let settings = StoreSettings {
            timeout: Duration::ZERO,
            ..StoreSettings::default()
        };
        let err = Store::new(db.clone(), settings)
            .transact("noop", |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Timeout { op: "noop", timeout_ms: 0 }));

        // far beyond u64 milliseconds; must not wrap to a small number
        let settings = StoreSettings {
            timeout: Duration::MAX,
            ..StoreSettings::default()
        };
        let store = Store::new(db, settings);
        let tx_ms = store
            .transact("noop", |tx| Ok(tx.timeout_ms))
            .unwrap();
        assert_eq!(tx_ms, u64::MAX);
    }

    #[test]
    fn settings_clamp_batch_size() {
        let mut config = PortalConfig::default();
        config.snapshot.batch_size = 0;
        let settings = StoreSettings::from(&config);
        assert_eq!(settings.batch_size, 1);
    }
}
