use std::sync::Arc;
use std::thread;

use topic_bus::broker::Fault;
use topic_bus::logging::LogLevel;
use topic_bus::publisher::SwapState;
use topic_bus::{EventPublisher, PublishError, AUTHENTICATION_TOKEN, USER};

use crate::support::{
    Harness, OrderPlaced, PRIMARY_NS, PUBLISHER_TOKEN, PUBLISHER_USER, SECONDARY_NS,
};

#[test]
fn publish_stamps_identity_properties() {
    let harness = Harness::new();
    let publisher = harness.bus.create_publisher("orders").unwrap();
    let event = OrderPlaced::new("o-10");

    publisher.publish(&event).unwrap();

    let sent = harness.broker.sent_to(PRIMARY_NS, "orders");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].label, "shop.orders.OrderPlaced");
    assert_eq!(sent[0].message_id, event.meta.event_id().simple().to_string());
    assert_eq!(sent[0].property(AUTHENTICATION_TOKEN), Some(PUBLISHER_TOKEN));
    assert_eq!(sent[0].property(USER), Some(PUBLISHER_USER));
    assert!(harness.log.contains(LogLevel::Event, "PublishEvent"));
}

#[test]
fn transient_send_failures_are_retried_on_the_same_connection() {
    let harness = Harness::with_passive();
    harness
        .broker
        .inject_send_faults(PRIMARY_NS, 4, Fault::Unavailable);
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-11")).unwrap();

    assert_eq!(harness.broker.sent_to(PRIMARY_NS, "orders").len(), 1);
    assert_eq!(publisher.active_namespace(), PRIMARY_NS);
    assert_eq!(harness.log.matching(LogLevel::Warn, "attempt").len(), 4);
    assert!(!harness.log.contains(LogLevel::Event, "ConnectionSwapped"));
}

#[test]
fn exhausted_attempts_without_passive_fail_the_publish() {
    let harness = Harness::new();
    harness.broker.set_available(PRIMARY_NS, false);
    let publisher = harness.bus.create_publisher("orders").unwrap();
    assert!(!publisher.failover_enabled());

    let err = publisher.publish(&OrderPlaced::new("o-12")).unwrap_err();

    assert!(matches!(err, PublishError::Delivery { attempts: 5, .. }));
    assert_eq!(harness.log.matching(LogLevel::Warn, "attempt").len(), 5);
    let errors = harness.log.matching(LogLevel::Error, "failed to deliver");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].param("EventName"), Some("shop.orders.OrderPlaced"));
}

#[test]
fn failing_active_swaps_to_passive_and_delivers_there() {
    let harness = Harness::with_passive();
    harness.broker.set_available(PRIMARY_NS, false);
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-13")).unwrap();

    assert_eq!(publisher.active_namespace(), SECONDARY_NS);
    assert_eq!(publisher.passive_namespace().as_deref(), Some(PRIMARY_NS));
    assert!(matches!(publisher.swap_state(), SwapState::CooldownActive { .. }));
    assert_eq!(harness.broker.sent_to(SECONDARY_NS, "orders").len(), 1);
    assert!(harness.broker.sent(PRIMARY_NS).is_empty());

    let swaps = harness.log.matching(LogLevel::Event, "ConnectionSwapped");
    assert_eq!(swaps.len(), 1);
    assert_eq!(swaps[0].param("From"), Some(PRIMARY_NS));
    assert_eq!(swaps[0].param("To"), Some(SECONDARY_NS));

    // Later publishes go straight to the new active connection.
    publisher.publish(&OrderPlaced::new("o-14")).unwrap();
    assert_eq!(harness.broker.sent_to(SECONDARY_NS, "orders").len(), 2);
}

#[test]
fn failure_within_cooldown_retries_on_current_active_without_swapping() {
    let harness = Harness::with_passive();
    harness.broker.set_available(PRIMARY_NS, false);
    let publisher = harness.bus.create_publisher("orders").unwrap();
    publisher.publish(&OrderPlaced::new("o-15")).unwrap();
    assert_eq!(publisher.active_namespace(), SECONDARY_NS);

    // One full round fails on the new active; the cooldown blocks a swap back.
    harness
        .broker
        .inject_send_faults(SECONDARY_NS, 5, Fault::Unavailable);
    publisher.publish(&OrderPlaced::new("o-16")).unwrap();

    assert_eq!(publisher.active_namespace(), SECONDARY_NS);
    assert_eq!(
        harness.log.matching(LogLevel::Event, "ConnectionSwapped").len(),
        1
    );
    assert!(harness
        .log
        .contains(LogLevel::Warn, "skipping connection swap for topic orders"));
    assert_eq!(harness.broker.sent_to(SECONDARY_NS, "orders").len(), 2);
}

#[test]
fn both_namespaces_down_fails_after_failover() {
    let harness = Harness::with_passive();
    harness.broker.set_available(PRIMARY_NS, false);
    harness.broker.set_available(SECONDARY_NS, false);
    let publisher = harness.bus.create_publisher("orders").unwrap();

    let err = publisher.publish(&OrderPlaced::new("o-17")).unwrap_err();

    assert!(matches!(err, PublishError::Failover { .. }));
    assert_eq!(harness.log.matching(LogLevel::Warn, "attempt").len(), 10);
    assert_eq!(
        harness.log.matching(LogLevel::Event, "ConnectionSwapped").len(),
        1
    );
}

#[test]
fn concurrent_failures_swap_exactly_once() {
    let harness = Harness::with_passive();
    harness.broker.set_available(PRIMARY_NS, false);
    let publisher = Arc::new(harness.bus.create_publisher("orders").unwrap());

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let publisher = Arc::clone(&publisher);
            thread::spawn(move || publisher.publish(&OrderPlaced::new(&format!("c-{}", i))))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(publisher.active_namespace(), SECONDARY_NS);
    assert_eq!(
        harness.log.matching(LogLevel::Event, "ConnectionSwapped").len(),
        1
    );
    assert_eq!(harness.broker.sent_to(SECONDARY_NS, "orders").len(), 4);
}
