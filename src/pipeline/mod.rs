//! The offer aggregation & booking pipeline.
//!
//! Items flow strictly downstream: inbound channel → combine → filter →
//! booking race → outbound channel. Each stage is a pool of workers sharing
//! one inbound and one outbound channel; different items interleave freely
//! across stages, so arrival order on the outbound channel is not guaranteed
//! to match the inbound order.
//!
//! Control flows orthogonally: every worker holds a subscription to the
//! pipeline's shutdown channel and stops pulling new items once it fires;
//! in-flight booking races are cancelled and compensated before their worker
//! exits.

mod booking;
#[cfg(test)]
mod booking_test;
mod combine;
mod filter;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::gateway::{BookingGateway, OfferSourceGateway};
use crate::ledger::BookingLedger;
use crate::models::PipelineItem;
use crate::pipeline::booking::BookingWorker;
use crate::pipeline::combine::CombineWorker;
use crate::pipeline::filter::FilterWorker;

pub(self) const METRIC_ITEMS_COMBINED: &str = "rentflow_items_combined";
pub(self) const METRIC_ITEMS_FILTERED: &str = "rentflow_items_filtered";
pub(self) const METRIC_ITEMS_BOOKED: &str = "rentflow_items_booked";
pub(self) const METRIC_ITEMS_UNBOOKABLE: &str = "rentflow_items_unbookable";
pub(self) const METRIC_BOOKINGS_COMPENSATED: &str = "rentflow_bookings_compensated";

/// An inbound channel end shared by all workers of one stage.
pub(self) type SharedReceiver = Arc<Mutex<mpsc::Receiver<PipelineItem>>>;

/// Pull the next item from a stage's shared inbound channel.
///
/// Cancel safe: dropping this future mid-pull loses no item and releases the
/// channel to the other workers of the pool.
pub(self) async fn next_item(inbound: &SharedReceiver) -> Option<PipelineItem> {
    inbound.lock().await.recv().await
}

/// A handle to a running pipeline.
pub struct Pipeline {
    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// The admission controller gating aggregation batches.
    admission: AdmissionController,
    /// The join handles of every stage worker.
    handles: Vec<JoinHandle<Result<()>>>,
}

impl Pipeline {
    /// Wire up the stage channels and spawn every stage's worker pool.
    ///
    /// Returns immediately with the outbound channel; pipeline execution
    /// proceeds in the background. The pipeline terminates either by a
    /// shutdown broadcast or by channel closure cascade once the producer
    /// drops the inbound sender and all queued items have drained.
    pub fn spawn(
        config: Arc<Config>, sources: Arc<dyn OfferSourceGateway>, bookings: Arc<dyn BookingGateway>, ledger: BookingLedger, shutdown_tx: broadcast::Sender<()>,
        inbound: mpsc::Receiver<PipelineItem>,
    ) -> (Self, mpsc::Receiver<PipelineItem>) {
        metrics::register_counter!(METRIC_ITEMS_COMBINED, metrics::Unit::Count, "the number of items enriched with aggregated offers");
        metrics::register_counter!(METRIC_ITEMS_FILTERED, metrics::Unit::Count, "the number of items passed through the filter stage");
        metrics::register_counter!(METRIC_ITEMS_BOOKED, metrics::Unit::Count, "the number of items which won a booking");
        metrics::register_counter!(METRIC_ITEMS_UNBOOKABLE, metrics::Unit::Count, "the number of items forwarded with a failure marker");
        metrics::register_counter!(METRIC_BOOKINGS_COMPENSATED, metrics::Unit::Count, "the number of booking attempts compensated");

        let admission = AdmissionController::new(config.max_parallel_agg_requests);
        let (combined_tx, combined_rx) = mpsc::channel(config.channel_capacity);
        let (filtered_tx, filtered_rx) = mpsc::channel(config.channel_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.channel_capacity);
        let inbound = Arc::new(Mutex::new(inbound));
        let combined_rx = Arc::new(Mutex::new(combined_rx));
        let filtered_rx = Arc::new(Mutex::new(filtered_rx));

        let mut handles = Vec::with_capacity(config.workers_count * 3);
        for id in 0..config.workers_count {
            handles.push(CombineWorker::new(id, sources.clone(), admission.clone(), inbound.clone(), combined_tx.clone(), shutdown_tx.subscribe()).spawn());
            handles.push(
                FilterWorker::new(
                    id,
                    config.filter_brand.clone(),
                    config.filter_max_price,
                    combined_rx.clone(),
                    filtered_tx.clone(),
                    shutdown_tx.subscribe(),
                )
                .spawn(),
            );
            handles.push(BookingWorker::new(id, bookings.clone(), ledger.clone(), filtered_rx.clone(), outbound_tx.clone(), shutdown_tx.subscribe()).spawn());
        }
        // The workers hold the only remaining senders, so each interior
        // channel closes as soon as its upstream pool has fully exited.
        drop(combined_tx);
        drop(filtered_tx);
        drop(outbound_tx);

        (
            Self {
                shutdown_tx,
                admission,
                handles,
            },
            outbound_rx,
        )
    }

    /// The admission controller gating this pipeline's aggregation batches.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Stop the pipeline and wait for full teardown.
    ///
    /// Broadcasts the shutdown signal, wakes any workers blocked on admission,
    /// then gathers every worker to confirm termination; in-flight booking
    /// races are cancelled and compensated before their workers report back.
    pub async fn shutdown(self) -> Result<()> {
        tracing::debug!("pipeline is shutting down");
        let _ = self.shutdown_tx.send(());
        self.admission.close();
        for handle in self.handles {
            if let Err(err) = handle.await.context("error joining pipeline worker handle").and_then(|res| res) {
                tracing::error!(error = ?err, "error shutting down pipeline worker");
            }
        }
        tracing::debug!("pipeline shutdown complete");
        Ok(())
    }
}
