//! Combine stage.

use std::sync::Arc;

use anyhow::Result;
use futures::future::try_join_all;
use futures::stream::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::admission::AdmissionController;
use crate::error::ItemError;
use crate::gateway::OfferSourceGateway;
use crate::models::{Offer, Payload, PipelineItem};
use crate::pipeline::{next_item, SharedReceiver};

/// A combine stage worker.
///
/// Pulls items from the shared inbound channel, fetches offers from every
/// source in the item's source list concurrently, and forwards the item with
/// the flattened offer list. The whole per-item batch of source calls is
/// gated as a unit by one admission slot.
pub(super) struct CombineWorker {
    /// The ID of this worker within its pool.
    id: usize,
    /// The gateway used for per-source offer fetches.
    sources: Arc<dyn OfferSourceGateway>,
    /// The admission controller gating aggregation batches.
    admission: AdmissionController,
    /// The shared channel of inbound items.
    inbound: SharedReceiver,
    /// The channel of combined items bound for the filter stage.
    outbound: mpsc::Sender<PipelineItem>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl CombineWorker {
    /// Create a new instance.
    pub(super) fn new(
        id: usize, sources: Arc<dyn OfferSourceGateway>, admission: AdmissionController, inbound: SharedReceiver, outbound: mpsc::Sender<PipelineItem>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            sources,
            admission,
            inbound,
            outbound,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
        }
    }

    pub(super) fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::debug!("combine worker {} has started", self.id);
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
        tracing::debug!("combine worker {} has shutdown", self.id);
        Ok(())
    }

    /// Aggregate offers for one item, returning `false` if this worker should stop.
    #[tracing::instrument(level = "trace", skip(self, item))]
    async fn handle_item(&mut self, item: PipelineItem) -> bool {
        let PipelineItem { user_id, payload } = item;
        let sources = match payload {
            Payload::Sources(sources) => sources,
            // Anything else is a marker from a producer bug; pass it along untouched.
            other => return self.forward(PipelineItem { user_id, payload: other }).await,
        };

        // One admission slot covers the whole batch of per-source calls.
        let permit = tokio::select! {
            res = self.admission.acquire() => match res {
                Ok(permit) => permit,
                Err(err) => {
                    tracing::debug!(error = %err, "combine worker {} released while waiting for admission", self.id);
                    return false;
                }
            },
            _ = self.shutdown_rx.next() => return false,
        };

        let gateway = self.sources.clone();
        let fetches = try_join_all(sources.iter().map(|source| {
            let gateway = gateway.clone();
            async move { gateway.fetch_offers(source).await.map_err(|err| (source.clone(), err)) }
        }));
        let fetched = tokio::select! {
            res = fetches => res,
            _ = self.shutdown_rx.next() => {
                tracing::debug!("combine worker {} dropped an in-flight aggregation batch on shutdown", self.id);
                return false;
            }
        };
        drop(permit);

        let payload = match fetched {
            Ok(batches) => {
                let offers: Vec<Offer> = batches.into_iter().flatten().collect();
                metrics::counter!(super::METRIC_ITEMS_COMBINED, 1);
                Payload::Offers(offers)
            }
            Err((source, err)) => {
                tracing::warn!(user_id, %source, error = %err, "aborting combine batch, source fetch failed");
                Payload::Failed(ItemError::SourceFetch {
                    source_id: source,
                    message: err.to_string(),
                })
            }
        };
        self.forward(PipelineItem { user_id, payload }).await
    }

    async fn forward(&mut self, item: PipelineItem) -> bool {
        if self.outbound.send(item).await.is_err() {
            tracing::debug!("combine worker {} outbound channel closed", self.id);
            return false;
        }
        true
    }
}
