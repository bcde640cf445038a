//! External gateway boundaries.
//!
//! Everything behind these traits is an external collaborator: real network
//! protocols to offer sources and booking providers are out of scope, so the
//! binary runs against latency-simulating implementations. Retries, if
//! desired, belong to the gateway implementations, never to the pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use rand::prelude::*;

use crate::config::Config;
use crate::error::GatewayError;
use crate::models::Offer;

/// A gateway for fetching rental offers from an offer source.
#[async_trait]
pub trait OfferSourceGateway: Send + Sync {
    /// Fetch the list of currently available offers from the given source.
    async fn fetch_offers(&self, source: &str) -> Result<Vec<Offer>, GatewayError>;
}

/// A gateway for placing and cancelling offer reservations.
#[async_trait]
pub trait BookingGateway: Send + Sync {
    /// Book the given offer for the given user, returning the confirmed offer.
    async fn book(&self, user_id: u64, offer: &Offer) -> Result<Offer, GatewayError>;

    /// Undo a partially-completed reservation.
    ///
    /// Best-effort compensating call; callers log failures and never escalate them.
    async fn cancel_booking(&self, user_id: u64, offer: &Offer) -> Result<(), GatewayError>;
}

/// A simulated offer source serving a fixed catalog after a network-shaped delay.
pub struct SimulatedSources {
    /// The application's runtime config.
    config: Arc<Config>,
}

impl SimulatedSources {
    /// Create a new instance.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OfferSourceGateway for SimulatedSources {
    async fn fetch_offers(&self, source: &str) -> Result<Vec<Offer>, GatewayError> {
        let jitter = rand::thread_rng().gen_range(0..=self.config.source_latency_ms / 10);
        tokio::time::sleep(std::time::Duration::from_millis(self.config.source_latency_ms + jitter)).await;
        Ok(vec![
            Offer::new(format!("http://{}/car?id=1", source), 1_000, "LADA"),
            Offer::new(format!("http://{}/car?id=2", source), 5_000, "MITSUBISHI"),
            Offer::new(format!("http://{}/car?id=3", source), 3_000, "KIA"),
            Offer::new(format!("http://{}/car?id=4", source), 2_000, "DAEWOO"),
            Offer::new(format!("http://{}/car?id=5", source), 10_000, "PORSCHE"),
        ])
    }
}

/// A simulated booking provider which confirms every booking after a fixed delay.
pub struct SimulatedBookings {
    /// The application's runtime config.
    config: Arc<Config>,
}

impl SimulatedBookings {
    /// Create a new instance.
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BookingGateway for SimulatedBookings {
    async fn book(&self, _user_id: u64, offer: &Offer) -> Result<Offer, GatewayError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.config.booking_latency_ms)).await;
        Ok(offer.clone())
    }

    async fn cancel_booking(&self, user_id: u64, offer: &Offer) -> Result<(), GatewayError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.config.cancel_latency_ms)).await;
        tracing::debug!(user_id, url = %offer.url, "booking cancellation confirmed");
        Ok(())
    }
}
