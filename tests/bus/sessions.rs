use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use topic_bus::{EventPublisher, EventSubscription, ReceiveMode};

use crate::support::{wait_until, Harness, ParcelScanned, TrackParcel, PRIMARY_NS};

const WAIT: Duration = Duration::from_secs(5);

fn position(calls: &[String], entry: &str) -> usize {
    calls
        .iter()
        .position(|c| c == entry)
        .unwrap_or_else(|| panic!("{} not recorded in {:?}", entry, calls))
}

#[test]
fn events_in_one_session_are_handled_in_order() {
    let harness = Harness::new();
    let tracker = Arc::new(TrackParcel::new(
        Arc::clone(&harness.recorder),
        Duration::from_millis(20),
    ));
    harness.container.register_instance(Arc::clone(&tracker));
    let subscription = harness.bus.add_subscription("parcels", "scans", true).unwrap();
    assert_eq!(subscription.target().mode, ReceiveMode::Sessions);
    subscription.add_subscription::<ParcelScanned, TrackParcel>();
    let publisher = harness.bus.create_publisher("parcels").unwrap();

    for step in 1..=3 {
        publisher.publish(&ParcelScanned::new("parcel-1", step)).unwrap();
    }

    assert!(wait_until(WAIT, || {
        harness.broker.completed(PRIMARY_NS, "parcels", "scans").len() == 3
    }));
    assert_eq!(
        harness.recorder.calls(),
        vec!["start:1", "end:1", "start:2", "end:2", "start:3", "end:3"]
    );
    assert_eq!(tracker.max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn sessions_keep_their_own_order_when_interleaved() {
    let harness = Harness::new();
    let tracker = Arc::new(TrackParcel::new(
        Arc::clone(&harness.recorder),
        Duration::from_millis(5),
    ));
    harness.container.register_instance(Arc::clone(&tracker));
    let subscription = harness.bus.add_subscription("parcels", "scans", true).unwrap();
    subscription.add_subscription::<ParcelScanned, TrackParcel>();
    let publisher = harness.bus.create_publisher("parcels").unwrap();

    publisher.publish(&ParcelScanned::new("parcel-a", 1)).unwrap();
    publisher.publish(&ParcelScanned::new("parcel-b", 10)).unwrap();
    publisher.publish(&ParcelScanned::new("parcel-a", 2)).unwrap();
    publisher.publish(&ParcelScanned::new("parcel-b", 11)).unwrap();

    assert!(wait_until(WAIT, || {
        harness.broker.completed(PRIMARY_NS, "parcels", "scans").len() == 4
    }));
    let calls = harness.recorder.calls();
    assert!(position(&calls, "end:1") < position(&calls, "start:2"));
    assert!(position(&calls, "end:10") < position(&calls, "start:11"));
}

#[test]
fn envelopes_carry_the_session_id() {
    let harness = Harness::new();
    let publisher = harness.bus.create_publisher("parcels").unwrap();

    publisher.publish(&ParcelScanned::new("parcel-9", 1)).unwrap();

    let sent = harness.broker.sent_to(PRIMARY_NS, "parcels");
    assert_eq!(sent[0].session_id.as_deref(), Some("parcel-9"));
}
