//! Rentflow error abstractions.

use serde::{Deserialize, Serialize};

/// An error from an external gateway call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// A transient network failure; the core performs no retries, see the gateway docs.
    #[error("transient network error calling '{endpoint}': {message}")]
    Transient {
        /// The source or booking endpoint which failed.
        endpoint: String,
        /// The underlying failure message.
        message: String,
    },
}

/// An error while waiting for an admission slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// The controller was closed while waiting; propagates as cancellation,
    /// never as a fetch failure.
    #[error("admission wait aborted, controller is closed")]
    Closed,
}

/// A per-item failure.
///
/// Item errors are local to their item: they are carried downstream as an
/// explicit `Payload::Failed` marker and never stop a stage's worker loop or
/// any other item in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ItemError {
    /// A source call of the item's combine batch failed, aborting the whole
    /// batch; no partial offer list is ever forwarded.
    #[error("offer aggregation failed at source '{source_id}': {message}")]
    SourceFetch {
        /// The offer source which failed.
        source_id: String,
        /// The underlying failure message.
        message: String,
    },
    /// No offers survived filtering, so there was nothing to race.
    #[error("no offers survived filtering")]
    NoOffers,
    /// Every booking attempt for the item failed.
    #[error("no booking attempt succeeded")]
    AllBookingAttemptsFailed,
}
