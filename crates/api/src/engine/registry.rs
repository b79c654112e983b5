//! Table of in-flight runs keyed by command id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cmdexec_core::types::DbId;
use tokio_util::sync::CancellationToken;

/// Cancellation handles for every run that has been started and not yet
/// cleaned up.
///
/// The lock is never held across an await point, so a plain
/// [`std::sync::Mutex`] is enough.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<DbId, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `token` for `id`. Returns `false` and leaves the existing
    /// entry in place if `id` is already tracked.
    pub fn insert(&self, id: DbId, token: CancellationToken) -> bool {
        let mut runs = self.lock();
        if runs.contains_key(&id) {
            return false;
        }
        runs.insert(id, token);
        true
    }

    /// Signal cancellation for `id`. Returns `false` if it is not tracked.
    pub fn cancel(&self, id: DbId) -> bool {
        let token = self.lock().get(&id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: DbId) -> Option<CancellationToken> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: DbId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DbId, CancellationToken>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---- Tests ----
