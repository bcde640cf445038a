//! Booking ledger.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A registry of per-user offer reservations, shared by all booking workers.
///
/// A reservation is present for a user between the start of a booking attempt
/// and either its compensating cancellation or its permanent acceptance as the
/// winning booking. All mutation goes through one mutex; critical sections
/// never await.
#[derive(Clone, Default)]
pub struct BookingLedger {
    inner: Arc<Mutex<HashMap<u64, HashSet<String>>>>,
}

impl BookingLedger {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reservation of the given offer URL for the given user.
    ///
    /// Returns `false` if the reservation was already held.
    pub fn reserve(&self, user_id: u64, url: &str) -> bool {
        self.lock().entry(user_id).or_default().insert(url.to_string())
    }

    /// Release a reservation of the given offer URL for the given user.
    ///
    /// Idempotent: releasing a reservation which is not held returns `false`
    /// and changes nothing.
    pub fn release(&self, user_id: u64, url: &str) -> bool {
        let mut map = self.lock();
        match map.get_mut(&user_id) {
            Some(urls) => {
                let removed = urls.remove(url);
                if urls.is_empty() {
                    map.remove(&user_id);
                }
                removed
            }
            None => false,
        }
    }

    /// All reservations currently held for the given user.
    pub fn reservations_for(&self, user_id: u64) -> HashSet<String> {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    /// The total number of reservations held across all users.
    pub fn total_reservations(&self) -> usize {
        self.lock().values().map(HashSet::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, HashSet<String>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
