use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::error::ItemError;
use crate::fixtures::RecordingBookings;
use crate::ledger::BookingLedger;
use crate::models::{Offer, Payload, PipelineItem};

use super::booking::BookingWorker;
use super::SharedReceiver;

fn shared(rx: mpsc::Receiver<PipelineItem>) -> SharedReceiver {
    Arc::new(Mutex::new(rx))
}

fn offers() -> Vec<Offer> {
    vec![
        Offer::new("http://s1/car?id=1", 1000, "LADA"),
        Offer::new("http://s1/car?id=3", 3000, "KIA"),
        Offer::new("http://s1/car?id=4", 2000, "DAEWOO"),
    ]
}

#[tokio::test(start_paused = true)]
async fn race_produces_exactly_one_winner() -> Result<()> {
    let bookings = Arc::new(RecordingBookings::new(Duration::from_millis(10)));
    let ledger = BookingLedger::new();
    let (shutdown_tx, _) = broadcast::channel(10);
    let (in_tx, in_rx) = mpsc::channel(10);
    let (out_tx, mut out_rx) = mpsc::channel(10);
    let handle = BookingWorker::new(0, bookings.clone(), ledger.clone(), shared(in_rx), out_tx, shutdown_tx.subscribe()).spawn();

    in_tx.send(PipelineItem {
        user_id: 7,
        payload: Payload::Offers(offers()),
    })
    .await?;
    drop(in_tx);

    let item = out_rx.recv().await.expect("expected a booked item on the outbound channel");
    let won = match item.payload {
        Payload::Booked(offer) => offer,
        other => panic!("expected a booked payload, got {:?}", other),
    };
    assert!(offers().contains(&won), "expected the winner to come from the raced offers, got {:?}", won);
    assert_eq!(ledger.total_reservations(), 1, "expected only the winner's reservation to stand, got {}", ledger.total_reservations());
    assert!(
        ledger.reservations_for(7).contains(&won.url),
        "expected the standing reservation to be the winner's, got {:?}",
        ledger.reservations_for(7)
    );

    let cancels = bookings.cancel_calls();
    assert_eq!(cancels.len(), 2, "expected every losing attempt to be cancelled, got {:?}", cancels);
    assert!(!cancels.iter().any(|(_, url)| url == &won.url), "expected the winner to never be cancelled, got {:?}", cancels);
    handle.await??;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn all_failed_attempts_forward_an_unbookable_marker() -> Result<()> {
    let bookings = Arc::new(
        RecordingBookings::new(Duration::from_millis(10))
            .with_failing_url("http://s1/car?id=1")
            .with_failing_url("http://s1/car?id=3")
            .with_failing_url("http://s1/car?id=4"),
    );
    let ledger = BookingLedger::new();
    let (shutdown_tx, _) = broadcast::channel(10);
    let (in_tx, in_rx) = mpsc::channel(10);
    let (out_tx, mut out_rx) = mpsc::channel(10);
    let handle = BookingWorker::new(0, bookings.clone(), ledger.clone(), shared(in_rx), out_tx, shutdown_tx.subscribe()).spawn();

    in_tx.send(PipelineItem {
        user_id: 7,
        payload: Payload::Offers(offers()),
    })
    .await?;
    drop(in_tx);

    let item = out_rx.recv().await.expect("expected a marked item on the outbound channel");
    assert_eq!(
        item.payload,
        Payload::Failed(ItemError::AllBookingAttemptsFailed),
        "expected an all-attempts-failed marker, got {:?}",
        item.payload
    );
    assert_eq!(ledger.total_reservations(), 0, "expected every reservation to be released, got {}", ledger.total_reservations());
    assert_eq!(bookings.cancel_calls().len(), 3, "expected every failed attempt to be compensated, got {:?}", bookings.cancel_calls());
    handle.await??;

    Ok(())
}

#[tokio::test]
async fn empty_offer_list_forwards_a_no_offers_marker() -> Result<()> {
    let bookings = Arc::new(RecordingBookings::new(Duration::from_millis(1)));
    let ledger = BookingLedger::new();
    let (shutdown_tx, _) = broadcast::channel(10);
    let (in_tx, in_rx) = mpsc::channel(10);
    let (out_tx, mut out_rx) = mpsc::channel(10);
    let handle = BookingWorker::new(0, bookings.clone(), ledger.clone(), shared(in_rx), out_tx, shutdown_tx.subscribe()).spawn();

    in_tx.send(PipelineItem {
        user_id: 7,
        payload: Payload::Offers(vec![]),
    })
    .await?;
    drop(in_tx);

    let item = out_rx.recv().await.expect("expected a marked item on the outbound channel");
    assert_eq!(item.payload, Payload::Failed(ItemError::NoOffers), "expected a no-offers marker, got {:?}", item.payload);
    assert!(bookings.booked_calls().is_empty(), "expected no booking calls for an empty offer list, got {:?}", bookings.booked_calls());
    handle.await??;

    Ok(())
}

#[tokio::test]
async fn failure_markers_pass_through_untouched() -> Result<()> {
    let bookings = Arc::new(RecordingBookings::new(Duration::from_millis(1)));
    let ledger = BookingLedger::new();
    let (shutdown_tx, _) = broadcast::channel(10);
    let (in_tx, in_rx) = mpsc::channel(10);
    let (out_tx, mut out_rx) = mpsc::channel(10);
    let handle = BookingWorker::new(0, bookings.clone(), ledger.clone(), shared(in_rx), out_tx, shutdown_tx.subscribe()).spawn();

    let marker = PipelineItem {
        user_id: 7,
        payload: Payload::Failed(ItemError::SourceFetch {
            source_id: "s1".into(),
            message: "connection reset by peer".into(),
        }),
    };
    in_tx.send(marker.clone()).await?;
    drop(in_tx);

    let item = out_rx.recv().await.expect("expected the marker on the outbound channel");
    assert_eq!(item, marker, "expected the marker to pass through untouched, got {:?}", item);
    assert!(bookings.booked_calls().is_empty(), "expected no booking calls for a marked item, got {:?}", bookings.booked_calls());
    handle.await??;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_and_compensates_an_in_flight_race() -> Result<()> {
    let bookings = Arc::new(RecordingBookings::new(Duration::from_millis(5000)));
    let ledger = BookingLedger::new();
    let (shutdown_tx, _) = broadcast::channel(10);
    let (in_tx, in_rx) = mpsc::channel(10);
    let (out_tx, mut out_rx) = mpsc::channel(10);
    let handle = BookingWorker::new(0, bookings.clone(), ledger.clone(), shared(in_rx), out_tx, shutdown_tx.subscribe()).spawn();

    in_tx.send(PipelineItem {
        user_id: 7,
        payload: Payload::Offers(vec![Offer::new("http://s1/car?id=1", 1000, "LADA"), Offer::new("http://s1/car?id=3", 3000, "KIA")]),
    })
    .await?;
    // Let the race begin before firing the shutdown signal.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ledger.total_reservations(), 2, "expected both attempts to hold reservations mid-race, got {}", ledger.total_reservations());
    let _ = shutdown_tx.send(());

    handle.await??;
    assert_eq!(ledger.total_reservations(), 0, "expected every reservation to be compensated on shutdown, got {}", ledger.total_reservations());
    assert_eq!(bookings.cancel_calls().len(), 2, "expected every in-flight attempt to be cancelled, got {:?}", bookings.cancel_calls());
    assert!(out_rx.recv().await.is_none(), "expected no item to be forwarded from an interrupted race");

    Ok(())
}
