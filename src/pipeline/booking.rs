//! Booking race stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::ItemError;
use crate::gateway::BookingGateway;
use crate::ledger::BookingLedger;
use crate::models::{Offer, Payload, PipelineItem};
use crate::pipeline::{next_item, SharedReceiver};

/// A booking race stage worker.
///
/// For each item, launches one booking attempt per surviving offer, keeps the
/// first attempt to complete, and cancels and compensates all others. The
/// item is never forwarded until every losing attempt has finished its
/// compensation, so no reservation is ever left dangling.
pub(super) struct BookingWorker {
    /// The ID of this worker within its pool.
    id: usize,
    /// The gateway used for booking and cancellation calls.
    bookings: Arc<dyn BookingGateway>,
    /// The shared registry of active reservations.
    ledger: BookingLedger,
    /// The shared channel of filtered items.
    inbound: SharedReceiver,
    /// The channel of finished items bound for the pipeline consumer.
    outbound: mpsc::Sender<PipelineItem>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

/// The terminal state of a single booking attempt.
enum AttemptOutcome {
    /// The attempt completed first and claimed the win; its reservation stands.
    Won(Offer),
    /// The attempt completed after a sibling had already won; compensated.
    Lost,
    /// The booking call itself failed; compensated.
    Failed,
    /// The attempt was cancelled before its booking call completed; compensated.
    Cancelled,
}

/// The result of racing all booking attempts for one item.
enum RaceOutcome {
    /// Exactly one attempt won; all others were compensated.
    Winner(Offer),
    /// No attempt succeeded.
    AllFailed,
    /// Shutdown fired mid-race; every attempt (winner included) was compensated.
    Interrupted,
}

impl BookingWorker {
    /// Create a new instance.
    pub(super) fn new(
        id: usize, bookings: Arc<dyn BookingGateway>, ledger: BookingLedger, inbound: SharedReceiver, outbound: mpsc::Sender<PipelineItem>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            bookings,
            ledger,
            inbound,
            outbound,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
        }
    }

    pub(super) fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("booking worker {} has started", self.id);
        loop {
            let item = tokio::select! {
                item_opt = next_item(&self.inbound) => match item_opt {
                    Some(item) => item,
                    None => break,
                },
                _ = self.shutdown_rx.next() => break,
            };
            if !self.handle_item(item).await {
                break;
            }
        }
        tracing::debug!("booking worker {} has shutdown", self.id);
        Ok(())
    }

    /// Race booking attempts for one item, returning `false` if this worker should stop.
    #[tracing::instrument(level = "trace", skip(self, item))]
    async fn handle_item(&mut self, item: PipelineItem) -> bool {
        let PipelineItem { user_id, payload } = item;
        match payload {
            Payload::Offers(offers) if offers.is_empty() => {
                metrics::counter!(super::METRIC_ITEMS_UNBOOKABLE, 1);
                self.forward(PipelineItem {
                    user_id,
                    payload: Payload::Failed(ItemError::NoOffers),
                })
                .await
            }
            Payload::Offers(offers) => match self.run_race(user_id, offers).await {
                RaceOutcome::Winner(offer) => {
                    metrics::counter!(super::METRIC_ITEMS_BOOKED, 1);
                    self.forward(PipelineItem {
                        user_id,
                        payload: Payload::Booked(offer),
                    })
                    .await
                }
                RaceOutcome::AllFailed => {
                    tracing::warn!(user_id, "every booking attempt failed, forwarding item as unbookable");
                    metrics::counter!(super::METRIC_ITEMS_UNBOOKABLE, 1);
                    self.forward(PipelineItem {
                        user_id,
                        payload: Payload::Failed(ItemError::AllBookingAttemptsFailed),
                    })
                    .await
                }
                RaceOutcome::Interrupted => false,
            },
            failed @ Payload::Failed(_) => self.forward(PipelineItem { user_id, payload: failed }).await,
            Payload::Sources(_) | Payload::Booked(_) => {
                tracing::error!(user_id, "item reached the booking stage in an unexpected state, dropping");
                true
            }
        }
    }

    /// Run all sibling attempts for one item in parallel, waiting for every
    /// loser's compensation before returning.
    async fn run_race(&mut self, user_id: u64, offers: Vec<Offer>) -> RaceOutcome {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let claim = Arc::new(AtomicBool::new(false));
        let mut attempts: FuturesUnordered<JoinHandle<AttemptOutcome>> = offers
            .into_iter()
            .map(|offer| {
                tokio::spawn(run_attempt(
                    Uuid::new_v4(),
                    user_id,
                    offer,
                    self.bookings.clone(),
                    self.ledger.clone(),
                    claim.clone(),
                    cancel_rx.clone(),
                ))
            })
            .collect();
        drop(cancel_rx);

        let mut winner = None;
        let mut interrupted = false;
        loop {
            tokio::select! {
                joined = attempts.next() => match joined {
                    Some(Ok(AttemptOutcome::Won(offer))) => {
                        winner = Some(offer);
                        let _ = cancel_tx.send(true);
                    }
                    Some(Ok(_)) => (),
                    Some(Err(err)) => tracing::error!(error = ?err, user_id, "error joining booking attempt task"),
                    None => break,
                },
                _ = self.shutdown_rx.next(), if !interrupted => {
                    tracing::debug!("booking worker {} cancelling in-flight race on shutdown", self.id);
                    interrupted = true;
                    let _ = cancel_tx.send(true);
                }
            }
        }

        if interrupted {
            // The item will not be forwarded, so the winner's reservation
            // must not outlive the race either.
            if let Some(offer) = winner.take() {
                compensate(self.bookings.as_ref(), &self.ledger, user_id, &offer).await;
            }
            return RaceOutcome::Interrupted;
        }
        match winner {
            Some(offer) => RaceOutcome::Winner(offer),
            None => RaceOutcome::AllFailed,
        }
    }

    async fn forward(&mut self, item: PipelineItem) -> bool {
        if self.outbound.send(item).await.is_err() {
            tracing::debug!("booking worker {} outbound channel closed", self.id);
            return false;
        }
        true
    }
}

/// Run a single booking attempt.
///
/// The reservation is recorded before the booking call goes out. The first
/// attempt whose call completes claims the win; every other path releases the
/// reservation and issues a best-effort cancellation before returning, so the
/// caller may treat a joined attempt as fully unwound.
async fn run_attempt(
    id: Uuid, user_id: u64, offer: Offer, bookings: Arc<dyn BookingGateway>, ledger: BookingLedger, claim: Arc<AtomicBool>, mut cancel_rx: watch::Receiver<bool>,
) -> AttemptOutcome {
    ledger.reserve(user_id, &offer.url);
    let book = bookings.book(user_id, &offer);
    tokio::pin!(book);
    let call_result = tokio::select! {
        res = &mut book => Some(res),
        _ = cancel_rx.changed() => None,
    };
    match call_result {
        Some(Ok(confirmed)) => {
            if claim.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                tracing::debug!(attempt = %id, user_id, url = %confirmed.url, "booking attempt won the race");
                AttemptOutcome::Won(confirmed)
            } else {
                compensate(bookings.as_ref(), &ledger, user_id, &offer).await;
                AttemptOutcome::Lost
            }
        }
        Some(Err(err)) => {
            tracing::warn!(attempt = %id, user_id, url = %offer.url, error = %err, "booking attempt failed");
            compensate(bookings.as_ref(), &ledger, user_id, &offer).await;
            AttemptOutcome::Failed
        }
        None => {
            compensate(bookings.as_ref(), &ledger, user_id, &offer).await;
            AttemptOutcome::Cancelled
        }
    }
}

/// Compensate a booking attempt: release its reservation and issue a
/// best-effort cancellation call. Cancellation failures are logged, never
/// escalated, and must not block pipeline progress.
async fn compensate(bookings: &dyn BookingGateway, ledger: &BookingLedger, user_id: u64, offer: &Offer) {
    ledger.release(user_id, &offer.url);
    if let Err(err) = bookings.cancel_booking(user_id, offer).await {
        tracing::warn!(user_id, url = %offer.url, error = %err, "best-effort booking cancellation failed");
    }
    metrics::counter!(super::METRIC_BOOKINGS_COMPENSATED, 1);
}
