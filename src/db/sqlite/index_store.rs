use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, query::Query, sqlite::SqliteArguments};
use tokio_util::sync::CancellationToken;

use super::common::{PENDING_COLUMNS, pending_from_row, to_millis};
use crate::{
    db::{
        cancellable,
        error::{DbError, DbResult},
        repos::IndexStore,
        unit_of_work::UnitOfWork,
    },
    models::{
        EntityScope, InstanceIdentifier, PartitionKey, PendingDeletion,
        VersionedInstanceIdentifier,
    },
};

/// Matches rows in one partition within an entity scope. Binds: partition,
/// study, optional series, optional sop.
const SCOPE_FILTER: &str = "partition_key = ?1 AND study_instance_uid = ?2 \
     AND (?3 IS NULL OR series_instance_uid = ?3) \
     AND (?4 IS NULL OR sop_instance_uid = ?4)";

/// Matches one pending-deletion record by its full versioned key.
const KEY_FILTER: &str = "partition_key = ? AND study_instance_uid = ? \
     AND series_instance_uid = ? AND sop_instance_uid = ? AND version = ?";

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_scope<'q>(
    query: SqliteQuery<'q>,
    partition: PartitionKey,
    scope: &'q EntityScope,
) -> SqliteQuery<'q> {
    query
        .bind(partition.value())
        .bind(scope.study_instance_uid())
        .bind(scope.series_instance_uid())
        .bind(scope.sop_instance_uid())
}

fn bind_key<'q>(query: SqliteQuery<'q>, id: &'q VersionedInstanceIdentifier) -> SqliteQuery<'q> {
    query
        .bind(id.partition().value())
        .bind(id.study_instance_uid())
        .bind(id.series_instance_uid())
        .bind(id.sop_instance_uid())
        .bind(id.version)
}

pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn register_instance(
        &self,
        identifier: InstanceIdentifier,
    ) -> DbResult<VersionedInstanceIdentifier> {
        let row = sqlx::query(
            r#"
            INSERT INTO instances (partition_key, study_instance_uid, series_instance_uid, sop_instance_uid, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING version
            "#,
        )
        .bind(identifier.partition.value())
        .bind(&identifier.study_instance_uid)
        .bind(&identifier.series_instance_uid)
        .bind(&identifier.sop_instance_uid)
        .bind(to_millis(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!("Instance {} is already registered", identifier))
            }
            _ => DbError::from(e),
        })?;

        let version: i64 = row.get("version");
        Ok(identifier.with_version(version))
    }

    async fn write_pending_deletion(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let insert = format!(
            r#"
            INSERT INTO deleted_instances (partition_key, study_instance_uid, series_instance_uid, sop_instance_uid, version, cleanup_after, retry_count, created_at)
            SELECT partition_key, study_instance_uid, series_instance_uid, sop_instance_uid, version, ?5, 0, ?6
            FROM instances
            WHERE {SCOPE_FILTER}
            "#
        );
        let moved = bind_scope(sqlx::query(&insert), partition, scope)
            .bind(to_millis(cleanup_after))
            .bind(to_millis(Utc::now()))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if moved == 0 {
            // Dropping the transaction rolls it back.
            return Err(DbError::NotFound);
        }

        let delete = format!("DELETE FROM instances WHERE {SCOPE_FILTER}");
        bind_scope(sqlx::query(&delete), partition, scope)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved)
    }

    async fn discover_due(
        &self,
        batch_size: u32,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<PendingDeletion>> {
        let sql = format!(
            r#"
            SELECT {PENDING_COLUMNS}
            FROM deleted_instances
            WHERE cleanup_after <= ? AND retry_count <= ?
            ORDER BY cleanup_after ASC, version ASC
            LIMIT ?
            "#
        );

        cancellable(cancel, async {
            let rows = sqlx::query(&sql)
                .bind(to_millis(Utc::now()))
                .bind(i64::from(max_retries))
                .bind(i64::from(batch_size))
                .fetch_all(&self.pool)
                .await?;
            rows.iter().map(pending_from_row).collect()
        })
        .await
    }

    async fn purge(
        &self,
        instance: &VersionedInstanceIdentifier,
        cancel: &CancellationToken,
    ) -> DbResult<()> {
        let sql = format!("DELETE FROM deleted_instances WHERE {KEY_FILTER}");
        cancellable(cancel, async {
            bind_key(sqlx::query(&sql), instance)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn increment_retry(
        &self,
        instance: &VersionedInstanceIdentifier,
        next_cleanup_after: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> DbResult<u32> {
        let sql = format!(
            r#"
            UPDATE deleted_instances
            SET retry_count = retry_count + 1, cleanup_after = ?
            WHERE {KEY_FILTER}
            RETURNING retry_count
            "#
        );

        cancellable(cancel, async {
            let query = sqlx::query(&sql).bind(to_millis(next_cleanup_after));
            let row = bind_key(query, instance)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DbError::NotFound)?;
            let count: i64 = row.get("retry_count");
            u32::try_from(count)
                .map_err(|_| DbError::Internal(format!("Retry count out of range: {}", count)))
        })
        .await
    }

    async fn restore_pending(
        &self,
        partition: PartitionKey,
        scope: &EntityScope,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            r#"
            SELECT {PENDING_COLUMNS}
            FROM deleted_instances d
            WHERE {SCOPE_FILTER}
              AND cleanup_after > ?5
              AND retry_count = 0
              AND NOT EXISTS (
                  SELECT 1 FROM instances i
                  WHERE i.partition_key = d.partition_key
                    AND i.study_instance_uid = d.study_instance_uid
                    AND i.series_instance_uid = d.series_instance_uid
                    AND i.sop_instance_uid = d.sop_instance_uid
              )
            ORDER BY version DESC
            "#
        );
        let rows = bind_scope(sqlx::query(&select), partition, scope)
            .bind(to_millis(now))
            .fetch_all(&mut *tx)
            .await?;

        let delete = format!("DELETE FROM deleted_instances WHERE {KEY_FILTER}");
        let mut seen = HashSet::new();
        let mut restored = 0u64;
        for row in &rows {
            let pending = pending_from_row(row)?;
            let id = &pending.instance;
            // Only the newest generation of a UID triple goes back live.
            if !seen.insert(id.identifier.clone()) {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO instances (version, partition_key, study_instance_uid, series_instance_uid, sop_instance_uid, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id.version)
            .bind(id.partition().value())
            .bind(id.study_instance_uid())
            .bind(id.series_instance_uid())
            .bind(id.sop_instance_uid())
            .bind(to_millis(now))
            .execute(&mut *tx)
            .await?;

            bind_key(sqlx::query(&delete), id).execute(&mut *tx).await?;
            restored += 1;
        }

        tx.commit().await?;
        Ok(restored)
    }

    async fn list_parked(&self, max_retries: u32, limit: u32) -> DbResult<Vec<PendingDeletion>> {
        let sql = format!(
            r#"
            SELECT {PENDING_COLUMNS}
            FROM deleted_instances
            WHERE retry_count > ?
            ORDER BY cleanup_after ASC, version ASC
            LIMIT ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(max_retries))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(pending_from_row).collect()
    }

    async fn reset_retries(
        &self,
        instance: &VersionedInstanceIdentifier,
        cleanup_after: DateTime<Utc>,
    ) -> DbResult<()> {
        let sql = format!(
            "UPDATE deleted_instances SET retry_count = 0, cleanup_after = ? WHERE {KEY_FILTER}"
        );
        let query = sqlx::query(&sql).bind(to_millis(cleanup_after));
        let updated = bind_key(query, instance)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn begin_unit_of_work(&self) -> DbResult<UnitOfWork> {
        // Pinning a connection keeps the pass from being starved by other pool users.
        let conn = self.pool.acquire().await?;
        Ok(UnitOfWork::with_session(conn))
    }
}
