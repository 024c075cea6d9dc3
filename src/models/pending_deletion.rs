use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VersionedInstanceIdentifier;

/// A pending-deletion record as held by the index store.
///
/// `retry_count` and `cleanup_after` together form the retry ledger: the
/// reconciler bumps the count and pushes `cleanup_after` forward each time a
/// physical delete fails. Once the count exceeds the pass's `max_retries` the
/// record is parked and left for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeletion {
    #[serde(flatten)]
    pub instance: VersionedInstanceIdentifier,
    /// Earliest instant physical deletion may be attempted.
    pub cleanup_after: DateTime<Utc>,
    /// Number of failed cleanup attempts so far.
    pub retry_count: u32,
    /// When the deletion was scheduled.
    pub created_at: DateTime<Utc>,
}

impl PendingDeletion {
    pub fn new(instance: VersionedInstanceIdentifier, cleanup_after: DateTime<Utc>) -> Self {
        Self {
            instance,
            cleanup_after,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether the record has exhausted its retry budget under `max_retries`.
    pub fn is_parked(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }

    /// Whether a reconciliation pass at `now` with `max_retries` would select this record.
    pub fn is_due(&self, now: DateTime<Utc>, max_retries: u32) -> bool {
        self.cleanup_after <= now && !self.is_parked(max_retries)
    }
}
