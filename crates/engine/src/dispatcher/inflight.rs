use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

/// Triggers with a cycle claimed but not yet finished (waiting for a permit
/// or running). One coarse lock over the whole set.
#[derive(Debug, Default, Clone)]
pub struct InFlightSet {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        // The set holds plain ids; a panic while holding the lock cannot
        // leave it half-updated.
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `id`, or `None` if a cycle for it is already in flight.
    pub fn try_claim(&self, id: Uuid) -> Option<InFlightGuard> {
        if self.lock().insert(id) {
            Some(InFlightGuard {
                set: self.clone(),
                id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the claim on drop, including when the task holding it panics.
#[derive(Debug)]
pub struct InFlightGuard {
    set: InFlightSet,
    id: Uuid,
}

impl InFlightGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}
