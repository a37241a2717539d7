//! Decides which entity a caller should be working on for a period.
use super::draft::Draft;
use super::error::Result;
use super::store::Store;
use super::submission::Submission;
use super::types::DraftKey;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "entity", rename_all = "lowercase")]
pub enum Work {
    Submission(Submission),
    Draft(Draft),
    /// Nothing to edit yet; the caller should start a fresh draft.
    Empty,
}

pub struct WorkResolver {
    store: Arc<Store>,
}

impl WorkResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// An OPEN or LOCKED submission for the period wins over the caller's
    /// active draft. Lock-free: reads never open a transaction.
    pub fn resolve(&self, key: &DraftKey) -> Result<Work> {
        if let Some(submission) = self.store.read_live_submission(&key.scope())? {
            return Ok(Work::Submission(submission));
        }
        if let Some(draft) = self.store.read_active_draft(key)? {
            return Ok(Work::Draft(draft));
        }
        Ok(Work::Empty)
    }
}
