use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Result of a garbage collection sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcOutcome {
    /// The sweep ran and removed this many entries.
    Removed(usize),
    /// The medium expires entries itself; no sweep was performed.
    NotApplicable,
    /// The sweep could not be carried out.
    Failed,
}

impl GcOutcome {
    pub fn removed(&self) -> usize {
        match self {
            GcOutcome::Removed(n) => *n,
            _ => 0,
        }
    }
}

impl fmt::Display for GcOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcOutcome::Removed(n) => write!(f, "removed {} session(s)", n),
            GcOutcome::NotApplicable => write!(f, "not applicable (backend expires sessions itself)"),
            GcOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Instant before which an entry counts as stale for a sweep with the given
/// maximum lifetime.
pub fn gc_cutoff(max_lifetime: u64) -> DateTime<Utc> {
    let secs = i64::try_from(max_lifetime).unwrap_or(i64::MAX);
    Utc::now()
        .checked_sub_signed(Duration::try_seconds(secs).unwrap_or(Duration::MAX))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
