use crate::ledger::BookingLedger;

#[test]
fn reserve_and_release_round_trip() {
    let ledger = BookingLedger::new();

    assert!(ledger.reserve(1, "http://s1/car?id=1"), "expected fresh reservation to be recorded");
    assert!(!ledger.reserve(1, "http://s1/car?id=1"), "expected duplicate reservation to be a no-op");
    assert_eq!(ledger.total_reservations(), 1, "expected one reservation, got {}", ledger.total_reservations());

    assert!(ledger.release(1, "http://s1/car?id=1"), "expected held reservation to be released");
    assert_eq!(ledger.total_reservations(), 0, "expected no reservations, got {}", ledger.total_reservations());
}

#[test]
fn release_is_idempotent() {
    let ledger = BookingLedger::new();
    ledger.reserve(1, "http://s1/car?id=1");
    ledger.reserve(1, "http://s1/car?id=2");

    assert!(ledger.release(1, "http://s1/car?id=1"), "expected first release to succeed");
    assert!(!ledger.release(1, "http://s1/car?id=1"), "expected second release to be a no-op");
    assert!(!ledger.release(2, "http://s1/car?id=2"), "expected release for the wrong user to be a no-op");

    let remaining = ledger.reservations_for(1);
    assert_eq!(remaining.len(), 1, "expected one remaining reservation, got {:?}", remaining);
    assert!(remaining.contains("http://s1/car?id=2"), "unexpected remaining reservation {:?}", remaining);
}

#[test]
fn reservations_are_scoped_per_user() {
    let ledger = BookingLedger::new();
    ledger.reserve(1, "http://s1/car?id=1");
    ledger.reserve(2, "http://s1/car?id=1");

    assert_eq!(ledger.total_reservations(), 2, "expected one reservation per user, got {}", ledger.total_reservations());
    assert!(ledger.release(1, "http://s1/car?id=1"), "expected user 1 release to succeed");
    assert!(
        ledger.reservations_for(2).contains("http://s1/car?id=1"),
        "expected user 2 reservation to be untouched, got {:?}",
        ledger.reservations_for(2)
    );
}

#[test]
fn concurrent_mutation_does_not_corrupt_the_ledger() {
    let ledger = BookingLedger::new();

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for n in 0..100 {
                    let url = format!("http://s{}/car?id={}", worker, n);
                    assert!(ledger.reserve(worker % 2, &url), "expected fresh reservation to be recorded");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("ledger writer thread panicked");
    }

    assert_eq!(ledger.total_reservations(), 800, "expected all reservations recorded, got {}", ledger.total_reservations());
    assert_eq!(ledger.reservations_for(0).len(), 400, "unexpected reservation count for user 0");
    assert_eq!(ledger.reservations_for(1).len(), 400, "unexpected reservation count for user 1");
}
