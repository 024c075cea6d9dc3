//! Scoped resource boundary for one reconciliation pass.
//!
//! A [`UnitOfWork`] is acquired from the index store before discovery and held
//! until the per-entity loop finishes. Stores may attach a session (for SQLite,
//! a pinned pool connection) that lives exactly as long as the pass. The
//! boundary is not a transaction: committing it only records that the loop ran
//! to completion, and dropping it uncommitted never undoes deletes that
//! already happened.

use std::time::Instant;

use uuid::Uuid;

use crate::observability::metrics;

pub struct UnitOfWork {
    id: Uuid,
    started_at: Instant,
    committed: bool,
    session: Option<Box<dyn Send>>,
}

impl UnitOfWork {
    /// A boundary with no backing session, for stores that need none.
    pub fn detached() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            committed: false,
            session: None,
        }
    }

    /// A boundary that keeps `session` alive until the pass ends.
    pub fn with_session(session: impl Send + 'static) -> Self {
        Self {
            session: Some(Box::new(session)),
            ..Self::detached()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Mark the pass's loop as completed and release the session.
    pub fn commit(mut self) {
        self.committed = true;
        // Drop runs here and releases the session.
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        self.session.take();

        if self.committed {
            tracing::debug!(
                unit_of_work = %self.id,
                elapsed_ms,
                "Unit of work committed"
            );
        } else {
            tracing::warn!(
                unit_of_work = %self.id,
                elapsed_ms,
                "Unit of work released without commit"
            );
        }
        metrics::record_unit_of_work(self.committed);
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("committed", &self.committed)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}
