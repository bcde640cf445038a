//! Filter stage.

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::models::{Offer, Payload, PipelineItem};
use crate::pipeline::{next_item, SharedReceiver};

/// A filter stage worker.
///
/// A pure transformation between its channel ends: applies the optional brand
/// and price predicates to the item's offer list and forwards it. No failure
/// modes other than propagated cancellation.
pub(super) struct FilterWorker {
    /// The ID of this worker within its pool.
    id: usize,
    /// An optional brand-equality predicate.
    brand: Option<String>,
    /// An optional price ceiling.
    max_price: Option<u64>,
    /// The shared channel of combined items.
    inbound: SharedReceiver,
    /// The channel of filtered items bound for the booking stage.
    outbound: mpsc::Sender<PipelineItem>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl FilterWorker {
    /// Create a new instance.
    pub(super) fn new(
        id: usize, brand: Option<String>, max_price: Option<u64>, inbound: SharedReceiver, outbound: mpsc::Sender<PipelineItem>, shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            brand,
            max_price,
            inbound,
            outbound,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
        }
    }

    pub(super) fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("filter worker {} has started", self.id);
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
        tracing::debug!("filter worker {} has shutdown", self.id);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, item))]
    async fn handle_item(&mut self, mut item: PipelineItem) -> bool {
        item.payload = match item.payload {
            Payload::Offers(offers) => {
                let kept = apply_predicates(offers, self.brand.as_deref(), self.max_price);
                metrics::counter!(super::METRIC_ITEMS_FILTERED, 1);
                Payload::Offers(kept)
            }
            other => other,
        };
        if self.outbound.send(item).await.is_err() {
            tracing::debug!("filter worker {} outbound channel closed", self.id);
            return false;
        }
        true
    }
}

/// Apply the optional brand & price predicates to the given offers.
///
/// An offer is retained iff the brand predicate is unset or matches exactly,
/// and the price ceiling is unset or not exceeded. Order is preserved and the
/// transformation is idempotent.
pub(super) fn apply_predicates(offers: Vec<Offer>, brand: Option<&str>, max_price: Option<u64>) -> Vec<Offer> {
    offers
        .into_iter()
        .filter(|offer| brand.map_or(true, |brand| offer.brand == brand) && max_price.map_or(true, |cap| offer.price <= cap))
        .collect()
}
