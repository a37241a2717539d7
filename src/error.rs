//! Error taxonomy for lifecycle operations
//!
//! Business-rule failures (`NotFound`, `Conflict`, `Forbidden`) are returned as
//! structured values so callers can map them onto 404/409/403 responses.
//! Everything else is fatal and the surrounding transaction has already been
//! rolled back by the time the caller sees it.

/// Why an entity could not be found.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("no active draft for org {org}, actor {actor}, period {period}")]
    ActiveDraft {
        org: String,
        actor: String,
        period: String,
    },
    #[error("no open or locked submission for org {org}, period {period}")]
    LiveSubmission { org: String, period: String },
    #[error("submission {0} does not exist")]
    Submission(String),
    #[error("draft {0} does not exist")]
    Draft(String),
    #[error("upload {0} does not exist")]
    Upload(String),
}

/// A precondition was violated by state that already exists.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    #[error("submission {submission_id} already exists for org {org}, period {period}")]
    SubmissionExists {
        org: String,
        period: String,
        submission_id: String,
    },
    #[error("actor {actor} already holds active draft {draft_id}")]
    ActiveDraftExists { actor: String, draft_id: String },
}

/// The entity's status (or the caller's role) disallows the operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Forbidden {
    #[error("submission {0} is locked and can no longer be edited")]
    SubmissionLocked(String),
    #[error("period {period} is closed for edits in org {org}")]
    PeriodClosed { org: String, period: String },
    #[error("actor {0} is not allowed to approve or reopen submissions")]
    NotApprover(String),
    #[error("cannot {action} a row that is {from}")]
    Transition { from: String, action: String },
    #[error("upload {0} is a submission snapshot and cannot be modified")]
    SnapshotImmutable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    NotFound(#[from] NotFound),
    #[error(transparent)]
    Conflict(#[from] Conflict),
    #[error(transparent)]
    Forbidden(#[from] Forbidden),
    #[error("{op} did not commit within {timeout_ms}ms")]
    Timeout { op: &'static str, timeout_ms: u64 },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode {0}")]
    Codec(String),
}

/// Coarse classification used at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    Timeout,
    Fatal,
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Storage(_) | Self::Codec(_) => ErrorKind::Fatal,
        }
    }

    /// HTTP-equivalent status for the error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Forbidden => 403,
            ErrorKind::Timeout => 503,
            ErrorKind::Fatal => 500,
        }
    }

    /// Stable machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(Conflict::SubmissionExists { .. }) => "SUBMISSION_EXISTS",
            Self::Conflict(Conflict::ActiveDraftExists { .. }) => "DRAFT_EXISTS",
            Self::Forbidden(Forbidden::SubmissionLocked(_)) => "SUBMISSION_LOCKED",
            Self::Forbidden(Forbidden::PeriodClosed { .. }) => "PERIOD_CLOSED",
            Self::Forbidden(Forbidden::NotApprover(_)) => "NOT_APPROVER",
            Self::Forbidden(Forbidden::Transition { .. }) => "INVALID_TRANSITION",
            Self::Forbidden(Forbidden::SnapshotImmutable(_)) => "SNAPSHOT_IMMUTABLE",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Storage(_) | Self::Codec(_) => "INTERNAL",
        }
    }

    /// Timeouts roll back completely, so the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl<E: std::fmt::Debug> From<minicbor::encode::Error<E>> for LifecycleError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        LifecycleError::Codec(format!("{value:?}"))
    }
}

impl From<minicbor::decode::Error> for LifecycleError {
    fn from(value: minicbor::decode::Error) -> Self {
        LifecycleError::Codec(value.to_string())
    }
}

pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_map_to_statuses() {
        let nf: LifecycleError = NotFound::Submission("sub_1".into()).into();
        assert_eq!(nf.status_code(), 404);
        assert_eq!(nf.code(), "NOT_FOUND");

        let conflict: LifecycleError = Conflict::SubmissionExists {
            org: "A".into(),
            period: "2025-Q1".into(),
            submission_id: "sub_1".into(),
        }
        .into();
        assert_eq!(conflict.status_code(), 409);
        assert_eq!(conflict.code(), "SUBMISSION_EXISTS");

        let locked: LifecycleError = Forbidden::SubmissionLocked("sub_1".into()).into();
        assert_eq!(locked.status_code(), 403);
        assert!(!locked.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        let err = LifecycleError::Timeout {
            op: "submit",
            timeout_ms: 10,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_retryable());
    }
}
