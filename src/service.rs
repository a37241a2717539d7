//! Service layer API for portal requests
//!
//! One method per exposed request. Each takes the authenticated actor from the
//! identity collaborator, checks the period calendar where edits are involved
//! and delegates to the owning component.
use super::active_draft::ActiveDraftStore;
use super::calendar::{AlwaysOpen, ClosedPeriods, PeriodCalendar};
use super::config::PortalConfig;
use super::draft::Draft;
use super::error::{Forbidden, Result};
use super::lifecycle::Lifecycle;
use super::resolver::{Work, WorkResolver};
use super::snapshot::Snapshotter;
use super::store::{Store, StoreSettings};
use super::submission::Submission;
use super::types::{Actor, DraftKey, DraftPatch, PeriodScope, UploadMeta};
use super::upload::Upload;
use super::version::VersionAllocator;
use std::sync::Arc;
use tracing::instrument;

pub struct PortalService {
    store: Arc<Store>,
    drafts: ActiveDraftStore,
    snapshots: Snapshotter,
    lifecycle: Lifecycle,
    resolver: WorkResolver,
    versions: VersionAllocator,
    calendar: Arc<dyn PeriodCalendar>,
}

impl PortalService {
    pub fn new(instance: Arc<sled::Db>, settings: StoreSettings) -> Self {
        let store = Arc::new(Store::new(instance, settings));
        Self {
            drafts: ActiveDraftStore::new(store.clone()),
            snapshots: Snapshotter::new(store.clone()),
            lifecycle: Lifecycle::new(store.clone()),
            resolver: WorkResolver::new(store.clone()),
            versions: VersionAllocator::new(store.clone()),
            calendar: Arc::new(AlwaysOpen),
            store,
        }
    }

    /// Build the service from configuration, including its closed periods.
    pub fn from_config(instance: Arc<sled::Db>, config: &PortalConfig) -> Self {
        let service = Self::new(instance, config.into());
        if config.calendar.closed_periods.is_empty() {
            return service;
        }
        service.with_calendar(Arc::new(ClosedPeriods::new(
            config.calendar.closed_periods.iter().cloned(),
        )))
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn PeriodCalendar>) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
    pub fn drafts(&self) -> &ActiveDraftStore {
        &self.drafts
    }
    pub fn snapshots(&self) -> &Snapshotter {
        &self.snapshots
    }
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
    pub fn versions(&self) -> &VersionAllocator {
        &self.versions
    }

    fn ensure_open(&self, org: &str, period: &str) -> Result<()> {
        if !self.calendar.is_open(org, period) {
            return Err(Forbidden::PeriodClosed {
                org: org.to_string(),
                period: period.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// `GET work?org&period`
    pub fn work(&self, actor: &Actor, org: &str, period: &str) -> Result<Work> {
        self.resolver.resolve(&DraftKey::new(org, actor.id.clone(), period))
    }

    /// `PUT draft?org&period`
    #[instrument(skip(self, actor, patch), fields(caller = %actor.id))]
    pub fn put_draft(&self, actor: &Actor, org: &str, period: &str, patch: &DraftPatch) -> Result<Draft> {
        self.ensure_open(org, period)?;
        self.drafts
            .upsert_active_draft(&DraftKey::new(org, actor.id.clone(), period), patch)
    }

    /// `POST draft/start-fresh?org&period`
    #[instrument(skip(self, actor, seed), fields(caller = %actor.id))]
    pub fn start_fresh(
        &self,
        actor: &Actor,
        org: &str,
        period: &str,
        seed: Option<&DraftPatch>,
    ) -> Result<Draft> {
        self.ensure_open(org, period)?;
        self.drafts
            .start_fresh(&DraftKey::new(org, actor.id.clone(), period), seed)
    }

    /// `POST draft/submit?org&period`
    #[instrument(skip(self, actor), fields(caller = %actor.id))]
    pub fn submit(&self, actor: &Actor, org: &str, period: &str) -> Result<Submission> {
        self.ensure_open(org, period)?;
        self.drafts
            .submit_draft(&DraftKey::new(org, actor.id.clone(), period))
    }

    /// `POST submission/approve?org&period`
    #[instrument(skip(self, actor), fields(caller = %actor.id))]
    pub fn approve(&self, actor: &Actor, org: &str, period: &str) -> Result<Submission> {
        self.lifecycle.approve(&PeriodScope::new(org, period), actor)
    }

    /// `POST submission/reopen?org&period`
    #[instrument(skip(self, actor), fields(caller = %actor.id))]
    pub fn reopen(&self, actor: &Actor, org: &str, period: &str) -> Result<Draft> {
        self.lifecycle.reopen(&PeriodScope::new(org, period), actor)
    }

    /// `PUT submission?org&period`
    #[instrument(skip(self, actor, patch), fields(caller = %actor.id))]
    pub fn edit_submission(
        &self,
        actor: &Actor,
        org: &str,
        period: &str,
        patch: &DraftPatch,
    ) -> Result<Submission> {
        self.ensure_open(org, period)?;
        self.lifecycle
            .edit_submission(&PeriodScope::new(org, period), patch)
    }

    /// `POST draft/files?org&period`
    #[instrument(skip(self, actor, meta), fields(caller = %actor.id, category = %meta.category))]
    pub fn attach_file(&self, actor: &Actor, org: &str, period: &str, meta: &UploadMeta) -> Result<Upload> {
        self.ensure_open(org, period)?;
        self.snapshots
            .record_upload(&DraftKey::new(org, actor.id.clone(), period), meta)
    }

    /// `POST submission/discard?org&period&id`
    #[instrument(skip(self, actor), fields(caller = %actor.id))]
    pub fn discard(&self, actor: &Actor, org: &str, period: &str, submission_id: &str) -> Result<Submission> {
        self.lifecycle
            .discard(&PeriodScope::new(org, period), submission_id, actor)
    }

    /// `GET submission/history?org&period`
    pub fn history(&self, org: &str, period: &str) -> Result<Vec<Submission>> {
        self.lifecycle.history(&PeriodScope::new(org, period))
    }
}
