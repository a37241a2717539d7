//! Period calendar collaborator: whether a period still accepts edits.
use std::collections::HashSet;

pub trait PeriodCalendar: Send + Sync {
    fn is_open(&self, org: &str, period: &str) -> bool;
}

/// Every period is open.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOpen;

impl PeriodCalendar for AlwaysOpen {
    fn is_open(&self, _org: &str, _period: &str) -> bool {
        true
    }
}

/// A fixed set of closed periods, shared by all organizations.
#[derive(Debug, Default, Clone)]
pub struct ClosedPeriods {
    closed: HashSet<String>,
}

impl ClosedPeriods {
    pub fn new<I, S>(periods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            closed: periods.into_iter().map(Into::into).collect(),
        }
    }
}

impl PeriodCalendar for ClosedPeriods {
    fn is_open(&self, _org: &str, period: &str) -> bool {
        !self.closed.contains(period)
    }
}
