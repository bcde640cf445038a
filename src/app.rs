//! Application wiring for when rentflow is running as a binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::gateway::{BookingGateway, OfferSourceGateway, SimulatedBookings, SimulatedSources};
use crate::ledger::BookingLedger;
use crate::models::{Payload, PipelineItem};
use crate::pipeline::Pipeline;

/// The application object for when rentflow is running as a binary.
///
/// Seeds the pipeline's inbound channel with demo aggregation requests, logs
/// every item emerging from the outbound channel, and handles signals plus the
/// optional auto-stop timer.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The running pipeline.
    pipeline: Pipeline,
    /// The join handle of the producer seeding the inbound channel.
    producer: JoinHandle<()>,
    /// The join handle of the outbound channel consumer.
    consumer: JoinHandle<u64>,
}

impl App {
    /// Create a new instance.
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(100);
        let ledger = BookingLedger::new();
        let sources: Arc<dyn OfferSourceGateway> = Arc::new(SimulatedSources::new(config.clone()));
        let bookings: Arc<dyn BookingGateway> = Arc::new(SimulatedBookings::new(config.clone()));

        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let (pipeline, outbound_rx) = Pipeline::spawn(config.clone(), sources, bookings, ledger, shutdown_tx.clone(), inbound_rx);
        let producer = tokio::spawn(seed_items(config.clone(), inbound_tx));
        let consumer = tokio::spawn(consume_outbound(outbound_rx));

        Self {
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            pipeline,
            producer,
            consumer,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));
        let run_for_seconds = self.config.run_for_seconds;
        let auto_stop = async move {
            match run_for_seconds {
                Some(seconds) => tokio::time::sleep(std::time::Duration::from_secs(seconds)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(auto_stop);

        let mut consumed = None;
        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = &mut auto_stop => {
                    tracing::debug!("auto-stop timer elapsed, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                res = &mut self.consumer => {
                    // The outbound channel closed: every seeded item has drained.
                    consumed = Some(res);
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("rentflow is shutting down");
        if let Err(err) = self.pipeline.shutdown().await {
            tracing::error!(error = ?err, "error shutting down pipeline");
        }
        if let Err(err) = self.producer.await {
            tracing::error!(error = ?err, "error joining producer task");
        }
        let consumed = match consumed {
            Some(res) => res,
            None => self.consumer.await,
        };
        match consumed {
            Ok(count) => tracing::info!(items_processed = count, "rentflow shutdown complete"),
            Err(err) => tracing::error!(error = ?err, "error joining outbound consumer task"),
        }
        Ok(())
    }
}

/// Seed the pipeline's inbound channel with one aggregation request per user.
async fn seed_items(config: Arc<Config>, inbound: mpsc::Sender<PipelineItem>) {
    for user_id in 1..=config.seed_items {
        let item = PipelineItem::new(user_id, config.sources.clone());
        if inbound.send(item).await.is_err() {
            tracing::debug!("inbound channel closed before seeding finished");
            return;
        }
    }
    // Dropping the sender lets the pipeline drain to completion.
    tracing::debug!(count = config.seed_items, "finished seeding pipeline items");
}

/// Consume the pipeline's outbound channel until it closes, returning the
/// number of items seen.
async fn consume_outbound(mut outbound: mpsc::Receiver<PipelineItem>) -> u64 {
    let mut count = 0;
    while let Some(item) = outbound.recv().await {
        count += 1;
        match &item.payload {
            Payload::Booked(offer) => {
                tracing::info!(user_id = item.user_id, url = %offer.url, price = offer.price, brand = %offer.brand, "booking complete")
            }
            Payload::Failed(err) => tracing::warn!(user_id = item.user_id, error = %err, "item finished without a booking"),
            _ => tracing::error!(user_id = item.user_id, "item emerged from the pipeline in an unexpected state"),
        }
    }
    count
}
