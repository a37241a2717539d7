//! Property-based tests for the status transition tables and version numbering
//!
//! The transition tables are small enough to check exhaustively inside each
//! case; proptest drives random event sequences through them and random
//! numbers of start-fresh calls through a real database.

use proptest::prelude::*;
use sled::open;
use std::sync::Arc;
use submission_lifecycle::PortalService;
use submission_lifecycle::draft::Draft;
use submission_lifecycle::lifecycle::{SubmissionEvent, apply_submission_event};
use submission_lifecycle::store::StoreSettings;
use submission_lifecycle::submission::{Submission, SubmissionStatus};
use submission_lifecycle::types::{Actor, DraftKey, DraftPatch, TimeStamp};
use tempfile::tempdir;

// PROPERTY TEST STRATEGIES

fn status_strategy() -> impl Strategy<Value = SubmissionStatus> {
    prop_oneof![
        Just(SubmissionStatus::Open),
        Just(SubmissionStatus::Locked),
        Just(SubmissionStatus::Archived),
        Just(SubmissionStatus::Discarded),
        Just(SubmissionStatus::LegacyDraft),
        Just(SubmissionStatus::LegacySubmitted),
    ]
}

fn event_strategy() -> impl Strategy<Value = SubmissionEvent> {
    prop_oneof![
        Just(SubmissionEvent::Approve),
        Just(SubmissionEvent::Reopen),
        Just(SubmissionEvent::Discard),
    ]
}

fn submission() -> Submission {
    let draft = Draft::new(
        "draft_p".to_string(),
        &DraftKey::new("A", "U1", "2025-Q1"),
        1,
        TimeStamp::new(),
    );
    Submission::from_draft("sub_p".to_string(), &draft, None, TimeStamp::new())
}

proptest! {
    /// LOCKED never goes back to OPEN, whatever happens to it.
    #[test]
    fn locked_never_reopens_for_editing(events in prop::collection::vec(event_strategy(), 0..12)) {
        let mut sub = submission();
        sub.status = SubmissionStatus::Locked;
        for event in events {
            let _ = apply_submission_event(&mut sub, event, "C1", TimeStamp::new());
            prop_assert_ne!(sub.status, SubmissionStatus::Open);
        }
    }

    /// ARCHIVED and DISCARDED accept no further events.
    #[test]
    fn terminal_statuses_are_final(status in status_strategy(), event in event_strategy()) {
        if status.is_terminal() {
            prop_assert_eq!(status.next(event), None);
        }
    }

    /// Rejected events leave the row untouched; accepted ones keep the first
    /// approval timestamp.
    #[test]
    fn first_approval_sticks(events in prop::collection::vec(event_strategy(), 1..12)) {
        let mut sub = submission();
        let mut first_approval = None;
        for event in events {
            let before = sub.clone();
            match apply_submission_event(&mut sub, event, "C1", TimeStamp::new()) {
                Ok(_) => {}
                Err(_) => prop_assert_eq!(&sub, &before),
            }
            if first_approval.is_none() {
                first_approval = sub.approved_at.clone();
            }
            if first_approval.is_some() {
                prop_assert_eq!(&sub.approved_at, &first_approval);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Successive start-fresh calls get strictly increasing versions, and
    /// an upsert in between never allocates a new one.
    #[test]
    fn start_fresh_versions_increase(rounds in 1usize..8, touch in prop::collection::vec(any::<bool>(), 8)) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(open(temp_dir.path().join("portal.db")).unwrap());
        let service = PortalService::new(db, StoreSettings::default());
        let u1 = Actor::member("U1");
        let key = DraftKey::new("A", "U1", "2025-Q1");

        let mut last = 0;
        for round in 0..rounds {
            let draft = service.start_fresh(&u1, "A", "2025-Q1", None).unwrap();
            prop_assert!(draft.version > last);
            last = draft.version;

            if touch[round] {
                let patch = DraftPatch::new().set_response("q1", "touched");
                let updated = service.put_draft(&u1, "A", "2025-Q1", &patch).unwrap();
                prop_assert_eq!(updated.version, last);
            }
        }

        let versions: Vec<u64> = service.drafts().list_drafts(&key).unwrap().iter().map(|d| d.version).collect();
        prop_assert_eq!(versions, (1..=rounds as u64).collect::<Vec<_>>());
        prop_assert_eq!(service.versions().next_version(&key).unwrap(), last + 1);
    }
}
