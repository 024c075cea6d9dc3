mod error;
pub mod memory;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;
mod unit_of_work;

#[cfg(test)]
pub mod tests;

use std::{future::Future, sync::Arc};

pub use error::{DbError, DbResult};
pub use repos::*;
use tokio_util::sync::CancellationToken;
pub use unit_of_work::UnitOfWork;

use crate::config::DatabaseConfig;

/// Run a store call, abandoning it at the next suspension point once `cancel` fires.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(DbError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::Cancelled),
        result = fut => result,
    }
}

enum PoolStorage {
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
    Memory,
}

/// Index store backend selected from configuration.
///
/// The store trait object is created once at construction time.
pub struct DbPool {
    inner: PoolStorage,
    index: Arc<dyn IndexStore>,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        DbPool {
            index: Arc::new(sqlite::SqliteIndexStore::new(pool.clone())),
            inner: PoolStorage::Sqlite(pool),
        }
    }

    /// A process-local index with no persistence.
    pub fn in_memory() -> Self {
        DbPool {
            inner: PoolStorage::Memory,
            index: Arc::new(memory::InMemoryIndexStore::new()),
        }
    }

    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::Memory => {
                tracing::warn!("Using in-memory index store; pending deletions are lost on exit");
                Ok(Self::in_memory())
            }
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                Ok(Self::from_sqlite(pool))
            }
        }
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
            PoolStorage::Memory => Ok(()),
        }
    }

    pub fn index_store(&self) -> Arc<dyn IndexStore> {
        self.index.clone()
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    /// Close pooled connections. A no-op for the in-memory backend.
    pub async fn close(&self) {
        match &self.inner {
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => pool.close().await,
            PoolStorage::Memory => {}
        }
    }
}

#[cfg(test)]
mod cancel_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_short_circuits_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: DbResult<u32> = cancellable(&cancel, async { Ok(7) }).await;
        assert!(matches!(result, Err(DbError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_through_result() {
        let cancel = CancellationToken::new();
        let result = cancellable(&cancel, async { Ok::<_, DbError>(7) }).await;
        assert_eq!(result.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_cancellable_aborts_pending_future() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result: DbResult<()> = cancellable(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(DbError::Cancelled)));
    }
}
