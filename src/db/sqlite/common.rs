use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqliteRow};

use crate::{
    db::error::{DbError, DbResult},
    models::{InstanceIdentifier, PartitionKey, PendingDeletion},
};

/// Columns selected for every pending-deletion read, in `pending_from_row` order.
pub const PENDING_COLUMNS: &str = "partition_key, study_instance_uid, series_instance_uid, \
     sop_instance_uid, version, cleanup_after, retry_count, created_at";

/// Timestamps are stored as unix milliseconds so range scans compare numerically.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Parse a millisecond timestamp from the database, returning a DbError on failure
pub fn from_millis(ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Internal(format!("Invalid timestamp in database: {}", ms)))
}

pub fn pending_from_row(row: &SqliteRow) -> DbResult<PendingDeletion> {
    let retry_count: i64 = row.get("retry_count");
    let instance = InstanceIdentifier::new(
        PartitionKey::new(row.get("partition_key")),
        row.get::<String, _>("study_instance_uid"),
        row.get::<String, _>("series_instance_uid"),
        row.get::<String, _>("sop_instance_uid"),
    )
    .with_version(row.get("version"));

    Ok(PendingDeletion {
        instance,
        cleanup_after: from_millis(row.get("cleanup_after"))?,
        retry_count: u32::try_from(retry_count).map_err(|_| {
            DbError::Internal(format!("Invalid retry count in database: {}", retry_count))
        })?,
        created_at: from_millis(row.get("created_at"))?,
    })
}
