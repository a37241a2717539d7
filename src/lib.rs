//! Submission lifecycle and draft versioning for a multi-tenant reporting portal.
//!
//! A reporting period's answers live in a per-actor [`draft::Draft`] until it is
//! submitted, at which point they are frozen into a [`submission::Submission`]
//! that a CEO approves (locks) or reopens. [`service::PortalService`] wires the
//! components together over one sled database.

pub mod active_draft;
pub mod calendar;
pub mod config;
pub mod draft;
pub mod error;
pub mod lifecycle;
pub mod resolver;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod submission;
pub mod telemetry;
pub mod types;
pub mod upload;
pub mod utils;
pub mod version;

pub use error::{LifecycleError, Result};
pub use resolver::Work;
pub use service::PortalService;
