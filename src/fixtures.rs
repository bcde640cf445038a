//! Shared test gateways.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::gateway::{BookingGateway, OfferSourceGateway};
use crate::models::Offer;

/// An offer source gateway serving a scripted per-source catalog.
pub struct ScriptedSources {
    /// The offers returned per source.
    catalog: HashMap<String, Vec<Offer>>,
    /// Sources which fail with a transient error.
    failing: HashSet<String>,
    /// The simulated latency of a fetch call.
    latency: Duration,
}

impl ScriptedSources {
    pub fn new(latency: Duration) -> Self {
        Self {
            catalog: Default::default(),
            failing: Default::default(),
            latency,
        }
    }

    pub fn with_source(mut self, source: &str, offers: Vec<Offer>) -> Self {
        self.catalog.insert(source.to_string(), offers);
        self
    }

    pub fn with_failing_source(mut self, source: &str) -> Self {
        self.failing.insert(source.to_string());
        self
    }
}

#[async_trait]
impl OfferSourceGateway for ScriptedSources {
    async fn fetch_offers(&self, source: &str) -> Result<Vec<Offer>, GatewayError> {
        tokio::time::sleep(self.latency).await;
        if self.failing.contains(source) {
            return Err(GatewayError::Transient {
                endpoint: source.to_string(),
                message: "connection reset by peer".into(),
            });
        }
        Ok(self.catalog.get(source).cloned().unwrap_or_default())
    }
}

/// A booking gateway which records every call and can be scripted to fail.
pub struct RecordingBookings {
    /// The simulated latency of a booking call.
    latency: Duration,
    /// Offer URLs whose booking call fails.
    failing: HashSet<String>,
    /// Every booking call which completed successfully.
    booked: Mutex<Vec<(u64, String)>>,
    /// Every cancellation call received.
    cancelled: Mutex<Vec<(u64, String)>>,
}

impl RecordingBookings {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing: Default::default(),
            booked: Default::default(),
            cancelled: Default::default(),
        }
    }

    pub fn with_failing_url(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Every booking call which completed successfully, in completion order.
    pub fn booked_calls(&self) -> Vec<(u64, String)> {
        self.booked.lock().expect("booked calls lock poisoned").clone()
    }

    /// Every cancellation call received, in arrival order.
    pub fn cancel_calls(&self) -> Vec<(u64, String)> {
        self.cancelled.lock().expect("cancel calls lock poisoned").clone()
    }
}

#[async_trait]
impl BookingGateway for RecordingBookings {
    async fn book(&self, user_id: u64, offer: &Offer) -> Result<Offer, GatewayError> {
        tokio::time::sleep(self.latency).await;
        if self.failing.contains(&offer.url) {
            return Err(GatewayError::Transient {
                endpoint: offer.url.clone(),
                message: "booking rejected".into(),
            });
        }
        self.booked.lock().expect("booked calls lock poisoned").push((user_id, offer.url.clone()));
        Ok(offer.clone())
    }

    async fn cancel_booking(&self, user_id: u64, offer: &Offer) -> Result<(), GatewayError> {
        self.cancelled.lock().expect("cancel calls lock poisoned").push((user_id, offer.url.clone()));
        Ok(())
    }
}
