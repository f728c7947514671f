//! Per-project write serialization
//!
//! Every mutating operation for a project holds that project's lock for its
//! whole transaction. Projects never share a lock, so allocation traffic for
//! one project does not wait on another. Cross-process exclusion is left to
//! SQLite's IMMEDIATE transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::project::ProjectId;

#[derive(Debug, Default)]
pub(crate) struct ProjectLocks {
    locks: Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    /// Get (creating on first use) the lock for `project`.
    pub(crate) fn lock_for(&self, project: &ProjectId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(project.clone()).or_default())
    }
}

/// Acquire a project lock.
///
/// A poisoned lock only means another caller panicked mid-operation; its
/// transaction was rolled back on drop, so the guarded state is intact.
pub(crate) fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
