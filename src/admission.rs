//! Admission control for offer aggregation fan-out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AdmissionError;

/// A limiter bounding the number of concurrent aggregation batches system-wide.
///
/// Combine workers acquire one slot per item batch, regardless of how many
/// per-source calls the batch fans out into. The underlying semaphore wakes
/// waiters in FIFO order, so no caller can be starved under sustained
/// contention.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<AdmissionControllerInner>,
}

struct AdmissionControllerInner {
    /// The semaphore bounding concurrent admissions.
    semaphore: Arc<Semaphore>,
    /// The configured admission limit.
    limit: usize,
    /// The number of currently held admissions.
    in_flight: AtomicUsize,
    /// The maximum number of concurrently held admissions ever observed.
    peak: AtomicUsize,
}

impl AdmissionController {
    /// Create a new instance with the given admission limit.
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(AdmissionControllerInner {
                semaphore: Arc::new(Semaphore::new(limit)),
                limit,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait until an admission slot is free, then claim it.
    ///
    /// The returned permit releases its slot when dropped. Dropping the future
    /// returned here while still waiting leaves no phantom admission behind.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AdmissionError> {
        let permit = self.inner.semaphore.clone().acquire_owned().await.map_err(|_| AdmissionError::Closed)?;
        let held = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(held, Ordering::AcqRel);
        Ok(AdmissionPermit {
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Close the controller, waking all waiters with `AdmissionError::Closed`.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// The configured admission limit.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// The number of currently held admissions.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// The maximum number of concurrently held admissions ever observed.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::Acquire)
    }
}

/// A held admission slot; the slot is released when this value is dropped.
pub struct AdmissionPermit {
    inner: Arc<AdmissionControllerInner>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
