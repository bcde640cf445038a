//! Core data models.

use serde::{Deserialize, Serialize};

use crate::error::ItemError;

/// A single rental offer returned by an offer source.
///
/// Offers are immutable value types; they are never mutated after a source
/// returns them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// The unique identifier of the rental listing.
    pub url: String,
    /// The cost of the offer.
    pub price: u64,
    /// The brand of the vehicle on offer.
    pub brand: String,
}

impl Offer {
    /// Create a new instance.
    pub fn new(url: impl Into<String>, price: u64, brand: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            price,
            brand: brand.into(),
        }
    }
}

/// The payload of a pipeline item as it moves through the stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// The identifiers of the offer sources to aggregate, as produced.
    Sources(Vec<String>),
    /// The aggregated offer list, present after combine and again after filtering.
    Offers(Vec<Offer>),
    /// The single winning offer of the booking race.
    Booked(Offer),
    /// An explicit failure marker for an item which could not be completed.
    Failed(ItemError),
}

/// A unit of work flowing through the pipeline.
///
/// Items are handed between stages over channels with single-owner semantics;
/// no two stages ever touch the same item concurrently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineItem {
    /// The identity of the requesting user; immutable after creation.
    pub user_id: u64,
    /// The stage-dependent payload of this item.
    pub payload: Payload,
}

impl PipelineItem {
    /// Create a new item ready for aggregation from the given sources.
    pub fn new(user_id: u64, sources: Vec<String>) -> Self {
        Self {
            user_id,
            payload: Payload::Sources(sources),
        }
    }
}
