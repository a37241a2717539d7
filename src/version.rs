//! Version numbers per (organization, actor, period).
//!
//! The allocator keeps a high-water mark that every draft and submission write
//! raises, so `next_in` is `MAX(version) + 1` over all rows of the tuple,
//! archived and discarded ones included, without scanning. Versions are an
//! audit aid; uniqueness of the active draft is enforced by the store's index.

use super::error::Result;
use super::store::{Store, Tx, TxResult, version_mark_key};
use super::types::DraftKey;
use std::sync::Arc;

pub struct VersionAllocator {
    store: Arc<Store>,
}

impl VersionAllocator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The version the next inserted row of the tuple would receive.
    pub fn next_version(&self, key: &DraftKey) -> Result<u64> {
        self.store.transact("next_version", |tx| Self::next_in(tx, key))
    }

    pub(crate) fn next_in(tx: &Tx<'_>, key: &DraftKey) -> TxResult<u64> {
        let current: Option<u64> = tx.get(&version_mark_key(key))?;
        Ok(current.map_or(1, |v| v + 1))
    }

    /// Raise the mark to `version` if it is below it.
    pub(crate) fn observe_in(tx: &Tx<'_>, key: &DraftKey, version: u64) -> TxResult<()> {
        let mark_key = version_mark_key(key);
        let current: Option<u64> = tx.get(&mark_key)?;
        if current.is_none_or(|v| v < version) {
            tx.put(&mark_key, &version)?;
        }
        Ok(())
    }
}
