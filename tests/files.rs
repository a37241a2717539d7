use anyhow::Context;
use sled::open;
use std::sync::Arc;
use std::time::Duration;
use submission_lifecycle::PortalService;
use submission_lifecycle::draft::{Draft, DraftStatus};
use submission_lifecycle::error::LifecycleError;
use submission_lifecycle::store::StoreSettings;
use submission_lifecycle::types::{Actor, DraftKey, DraftPatch, PeriodScope, TimeStamp, UploadMeta};

use tempfile::tempdir;

fn report(name: &str) -> UploadMeta {
    UploadMeta {
        category: "evidence".to_string(),
        object_key: format!("A/2025-Q1/{name}"),
        size: 4096,
        content_type: "application/pdf".to_string(),
        storage_ref: format!("s3://portal/A/2025-Q1/{name}"),
    }
}

#[test]
fn submit_snapshots_draft_files() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(
        db,
        StoreSettings {
            batch_size: 2,
            ..StoreSettings::default()
        },
    );
    let u1 = Actor::member("U1");
    let scope = PeriodScope::new("A", "2025-Q1");

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new().set_response("q1", "yes"))?;
    let mut originals = Vec::new();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        originals.push(service.attach_file(&u1, "A", "2025-Q1", &report(name))?);
    }

    let submission = service.submit(&u1, "A", "2025-Q1")?;
    let snapshots = service.snapshots().submission_files(&submission.id)?;
    assert_eq!(snapshots.len(), originals.len());

    for (snapshot, original) in snapshots.iter().zip(&originals) {
        assert!(snapshot.is_snapshot);
        assert_ne!(snapshot.id, original.id);
        assert_eq!(snapshot.submission_id.as_deref(), Some(submission.id.as_str()));
        assert_eq!(snapshot.original_upload_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(snapshot.content_hash, original.content_hash);
        assert_eq!(snapshot.storage_ref, original.storage_ref);
    }

    // copies, not moves: the draft side keeps its rows untouched
    let draft_side = service.snapshots().draft_files(&scope)?;
    assert_eq!(draft_side, originals);
    Ok(())
}

#[test]
fn attach_requires_an_active_draft() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(db, StoreSettings::default());
    let u1 = Actor::member("U1");

    let err = service.attach_file(&u1, "A", "2025-Q1", &report("a.pdf")).unwrap_err();
    assert_eq!(err.status_code(), 404);

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    service.submit(&u1, "A", "2025-Q1")?;
    let err = service.attach_file(&u1, "A", "2025-Q1", &report("late.pdf")).unwrap_err();
    assert_eq!(err.status_code(), 404);
    Ok(())
}

#[test]
fn copy_back_is_idempotent() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(db, StoreSettings::default());
    let u1 = Actor::member("U1");
    let scope = PeriodScope::new("A", "2025-Q1");

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    service.attach_file(&u1, "A", "2025-Q1", &report("a.pdf"))?;
    service.attach_file(&u1, "A", "2025-Q1", &report("b.pdf"))?;
    let submission = service.submit(&u1, "A", "2025-Q1")?;

    service.reopen(&Actor::ceo("C1"), "A", "2025-Q1")?;
    let after_reopen = service.snapshots().draft_files(&scope)?;
    assert_eq!(after_reopen.len(), 2);

    let archived = service
        .store()
        .read_submission(&scope, &submission.id)?
        .context("submission row missing")?;
    assert_eq!(service.snapshots().copy_back(&archived)?, 0);
    assert_eq!(service.snapshots().copy_back(&archived)?, 0);
    assert_eq!(service.snapshots().draft_files(&scope)?, after_reopen);

    // snapshots survive the reopen unchanged
    let snapshots = service.snapshots().submission_files(&submission.id)?;
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|u| u.is_snapshot));
    Ok(())
}

#[test]
fn resubmission_snapshots_files_again() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(db, StoreSettings::default());
    let u1 = Actor::member("U1");

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    service.attach_file(&u1, "A", "2025-Q1", &report("a.pdf"))?;
    let first = service.submit(&u1, "A", "2025-Q1")?;

    service.reopen(&Actor::ceo("C1"), "A", "2025-Q1")?;
    service.attach_file(&u1, "A", "2025-Q1", &report("b.pdf"))?;
    let second = service.submit(&u1, "A", "2025-Q1")?;

    assert_eq!(service.snapshots().submission_files(&first.id)?.len(), 1);
    let second_files = service.snapshots().submission_files(&second.id)?;
    assert_eq!(second_files.len(), 2);
    assert!(
        second_files
            .iter()
            .all(|u| u.submission_id.as_deref() == Some(second.id.as_str()))
    );
    Ok(())
}

#[test]
fn timed_out_operation_rolls_back() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let u1 = Actor::member("U1");
    let key = DraftKey::new("A", "U1", "2025-Q1");

    let impatient = PortalService::new(
        db.clone(),
        StoreSettings {
            timeout: Duration::ZERO,
            ..StoreSettings::default()
        },
    );
    let err = impatient
        .put_draft(&u1, "A", "2025-Q1", &DraftPatch::new().set_response("q1", "yes"))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Timeout { op: "upsert_active_draft", .. }));
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);
    assert!(impatient.store().read_active_draft(&key)?.is_none());

    let service = PortalService::new(db, StoreSettings::default());
    let draft = service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new().set_response("q1", "yes"))?;
    assert_eq!(draft.version, 1, "nothing from the timed out attempt may remain");
    Ok(())
}

#[test]
fn snapshot_only_freezes_the_active_draft() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(db, StoreSettings::default());
    let u1 = Actor::member("U1");
    let key = DraftKey::new("A", "U1", "2025-Q1");
    let scope = PeriodScope::new("A", "2025-Q1");

    let unsaved = Draft::new("draft_unsaved".into(), &key, 1, TimeStamp::new());
    let err = service.snapshots().snapshot(&unsaved).unwrap_err();
    assert_eq!(err.status_code(), 404);

    let stale = service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    let fresh = service.start_fresh(&u1, "A", "2025-Q1", None)?;
    let err = service.snapshots().snapshot(&stale).unwrap_err();
    assert_eq!(err.code(), "DRAFT_EXISTS");
    assert!(service.store().list_submissions(&scope)?.is_empty());

    let submission = service.snapshots().snapshot(&fresh)?;
    let archived = service
        .store()
        .read_draft(&key, &fresh.id)?
        .context("draft row missing")?;
    assert_eq!(archived.status, DraftStatus::Archived);
    assert_eq!(archived.submitted_as_submission_id.as_deref(), Some(submission.id.as_str()));
    assert!(service.store().read_active_draft(&key)?.is_none());

    // the period is not wedged: a retried submit sees the same submission
    assert_eq!(service.submit(&u1, "A", "2025-Q1")?, submission);
    Ok(())
}

#[test]
fn copy_back_requires_the_reopened_submission() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(db, StoreSettings::default());
    let u1 = Actor::member("U1");
    let scope = PeriodScope::new("A", "2025-Q1");

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    service.attach_file(&u1, "A", "2025-Q1", &report("a.pdf"))?;
    let open_submission = service.submit(&u1, "A", "2025-Q1")?;
    let draft_side = service.snapshots().draft_files(&scope)?;

    let err = service.snapshots().copy_back(&open_submission).unwrap_err();
    assert_eq!((err.status_code(), err.code()), (403, "INVALID_TRANSITION"));
    assert_eq!(service.snapshots().draft_files(&scope)?, draft_side);

    service.reopen(&Actor::ceo("C1"), "A", "2025-Q1")?;
    service.start_fresh(&u1, "A", "2025-Q1", None)?;
    let archived = service
        .store()
        .read_submission(&scope, &open_submission.id)?
        .context("submission row missing")?;
    let before = service.snapshots().draft_files(&scope)?;
    let err = service.snapshots().copy_back(&archived).unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(service.snapshots().draft_files(&scope)?, before);
    Ok(())
}

#[test]
fn failed_duplication_leaves_no_partial_snapshot() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("portal.db"))?);
    let service = PortalService::new(
        db.clone(),
        StoreSettings {
            batch_size: 1,
            ..StoreSettings::default()
        },
    );
    let u1 = Actor::member("U1");
    let key = DraftKey::new("A", "U1", "2025-Q1");
    let scope = PeriodScope::new("A", "2025-Q1");

    service.put_draft(&u1, "A", "2025-Q1", &DraftPatch::new())?;
    let mut uploads = Vec::new();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        uploads.push(service.attach_file(&u1, "A", "2025-Q1", &report(name))?);
    }

    // the last row vanishes, so the third batch fails after two were copied
    db.remove(format!("upload/{}", hex::encode(&uploads[2].id)))?;

    let err = service.submit(&u1, "A", "2025-Q1").unwrap_err();
    assert_eq!(err.status_code(), 404);

    assert!(service.store().list_submissions(&scope)?.is_empty());
    assert!(service.store().read_live_submission(&scope)?.is_none());
    let draft = service
        .store()
        .read_active_draft(&key)?
        .context("active draft missing")?;
    assert_eq!(draft.status, DraftStatus::Draft);
    assert_eq!(db.scan_prefix("upload/").count(), 2);
    Ok(())
}
