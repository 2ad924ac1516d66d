use std::sync::Arc;
use std::time::Duration;

use topic_bus::broker::{
    BrokerConnector, ClientOptions, ConnectionString, Fault, RetryExponential, TopicClient,
};
use topic_bus::identity::IdentityProvider;
use topic_bus::logging::LogLevel;
use topic_bus::{Envelope, EventPublisher, EventSubscription, AUTHENTICATION_TOKEN, USER};

use crate::support::{
    fast_subscription, wait_until, ExplodeOnOrder, Harness, NotifyWarehouse, OrderPlaced,
    RecordOrder, RejectOrder, SlowFirstOrder, TokenCheck, PRIMARY, PRIMARY_NS, PUBLISHER_TOKEN,
    SECONDARY_NS,
};

const WAIT: Duration = Duration::from_secs(5);

fn completed(harness: &Harness, namespace: &str) -> Vec<String> {
    harness.broker.completed(namespace, "orders", "billing")
}

fn send_raw(harness: &Harness, envelope: &Envelope) {
    let conn = ConnectionString::parse(PRIMARY).unwrap();
    let topic = harness
        .broker
        .topic_client(&conn, "orders", &ClientOptions::default())
        .unwrap();
    topic.send(envelope).unwrap();
}

fn order_body(order_id: &str) -> Vec<u8> {
    serde_json::to_vec(&OrderPlaced::new(order_id)).unwrap()
}

#[test]
fn message_without_handlers_is_completed() {
    let harness = Harness::new();
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-20")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    assert_eq!(harness.broker.active_message_count(PRIMARY_NS, "orders", "billing"), 0);
    subscription.dispose();
}

#[test]
fn single_handler_is_invoked_once() {
    let harness = Harness::new();
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-21")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.recorder.calls(), vec!["record:o-21"]);

    let received = harness.log.matching(LogLevel::Event, "EventReceived");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].param("Subscription"), Some("orders/subscriptions/billing"));
    assert!(harness
        .log
        .matching(LogLevel::Request, "orders/subscriptions/billing")
        .iter()
        .any(|e| e.param("ResponseCode") == Some("Completed")));
}

#[test]
fn faulting_handler_does_not_stop_the_others() {
    let harness = Harness::new();
    let recorder = &harness.recorder;
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(recorder))))
        .register_instance(Arc::new(RejectOrder(Arc::clone(recorder))))
        .register_instance(Arc::new(NotifyWarehouse(Arc::clone(recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    subscription.add_subscription::<OrderPlaced, RejectOrder>();
    subscription.add_subscription::<OrderPlaced, NotifyWarehouse>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-22")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    let mut calls = recorder.calls();
    calls.sort();
    assert_eq!(calls, vec!["notify:o-22", "record:o-22", "reject:o-22"]);

    let faults = harness.log.matching(LogLevel::Error, "order o-22 rejected");
    assert_eq!(faults.len(), 1);
    assert!(faults[0].param("Handler").unwrap().ends_with("RejectOrder"));
    assert_eq!(faults[0].param("EventType"), Some("shop.orders.OrderPlaced"));
}

#[test]
fn panicking_handler_is_logged_and_message_completed() {
    let harness = Harness::new();
    harness
        .container
        .register_instance(Arc::new(ExplodeOnOrder))
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, ExplodeOnOrder>();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-23")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    assert_eq!(harness.recorder.calls(), vec!["record:o-23"]);
    assert!(harness.log.contains(LogLevel::Error, "warehouse offline"));
}

#[test]
fn unresolved_handler_is_skipped() {
    let harness = Harness::new();
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-24")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    assert!(harness.log.contains(LogLevel::Warn, "no instances resolved"));
    assert_eq!(harness.recorder.count(), 0);
}

#[test]
fn missing_properties_leave_the_message_unacknowledged() {
    let harness = Harness::with_lock_duration(Duration::from_millis(50));
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();

    send_raw(
        &harness,
        &Envelope::new("raw-1", "shop.orders.OrderPlaced", order_body("o-25")),
    );

    // Redelivered after each lock expiry, failing every time.
    assert!(wait_until(WAIT, || {
        harness
            .log
            .matching(LogLevel::Error, "missing property")
            .len()
            >= 2
    }));
    subscription.dispose();
    assert!(completed(&harness, PRIMARY_NS).is_empty());
    assert_eq!(harness.recorder.count(), 0);
    assert!(subscription.stats().failed >= 2);
    assert_eq!(harness.broker.active_message_count(PRIMARY_NS, "orders", "billing"), 1);
}

#[test]
fn malformed_body_leaves_the_message_unacknowledged() {
    let harness = Harness::with_lock_duration(Duration::from_millis(50));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();

    send_raw(
        &harness,
        &Envelope::new("raw-2", "shop.orders.OrderPlaced", b"{not json".to_vec())
            .with_property(AUTHENTICATION_TOKEN, "token-1")
            .with_property(USER, "someone"),
    );

    assert!(wait_until(WAIT, || {
        harness.log.contains(LogLevel::Error, "failed to deserialize")
    }));
    subscription.dispose();
    assert!(completed(&harness, PRIMARY_NS).is_empty());
    let errors = harness.log.matching(LogLevel::Error, "failed to deserialize");
    assert_eq!(errors[0].param("MessageId"), Some("raw-2"));
}

#[test]
fn identity_providers_see_the_token() {
    let harness = Harness::new();
    let identity = Arc::new(TokenCheck::default());
    let provider = Arc::clone(&identity);
    harness
        .container
        .register_identity(move || Arc::clone(&provider) as Arc<dyn IdentityProvider>)
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-26")).unwrap();
    send_raw(
        &harness,
        &Envelope::new("raw-3", "shop.orders.OrderPlaced", order_body("o-27"))
            .with_property(AUTHENTICATION_TOKEN, "forged")
            .with_property(USER, "intruder"),
    );

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 2));
    let mut seen = identity.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["forged".to_string(), PUBLISHER_TOKEN.to_string()]);

    // A rejected token is logged; the handlers still run.
    assert!(harness
        .log
        .contains(LogLevel::Warn, "could not establish identity of intruder"));
    assert_eq!(harness.recorder.count(), 2);
}

#[test]
fn expired_lock_gets_the_message_redelivered() {
    let harness = Harness::with_lock_duration(Duration::from_millis(60)).subscription_options(
        topic_bus::SubscriptionOptions {
            max_auto_renew: Duration::ZERO,
            ..fast_subscription()
        },
    );
    harness.container.register_instance(Arc::new(SlowFirstOrder {
        recorder: Arc::clone(&harness.recorder),
        delay: Duration::from_millis(200),
    }));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, SlowFirstOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-28")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    assert!(wait_until(WAIT, || {
        harness
            .log
            .matching(LogLevel::Request, "orders/subscriptions/billing")
            .iter()
            .any(|e| e.param("ResponseCode") == Some("Abandoned"))
    }));
    assert_eq!(harness.recorder.count_of("slow:o-28"), 2);
    subscription.dispose();
    assert!(subscription.stats().abandoned >= 1);
}

#[test]
fn slow_handler_keeps_its_lock_through_renewal() {
    let harness = Harness::with_lock_duration(Duration::from_millis(80));
    harness.container.register_instance(Arc::new(SlowFirstOrder {
        recorder: Arc::clone(&harness.recorder),
        delay: Duration::from_millis(300),
    }));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, SlowFirstOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-31")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(harness.recorder.count_of("slow:o-31"), 1);
    let codes: Vec<String> = harness
        .log
        .matching(LogLevel::Request, "orders/subscriptions/billing")
        .iter()
        .filter_map(|e| e.param("ResponseCode").map(str::to_string))
        .collect();
    assert_eq!(codes, vec!["Completed"]);
    subscription.dispose();
    assert_eq!(subscription.stats().abandoned, 0);
}

#[test]
fn transient_receive_faults_are_retried_by_the_client() {
    let harness = Harness::new().subscription_options(topic_bus::SubscriptionOptions {
        client: ClientOptions::new(
            Duration::from_secs(1),
            RetryExponential::new(Duration::from_millis(1), Duration::from_millis(5), 5),
        ),
        ..fast_subscription()
    });
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    harness
        .broker
        .inject_receive_faults(PRIMARY_NS, 3, Fault::ServerBusy);
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    let publisher = harness.bus.create_publisher("orders").unwrap();

    publisher.publish(&OrderPlaced::new("o-32")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, PRIMARY_NS).len() == 1));
    subscription.dispose();
    assert_eq!(harness.recorder.calls(), vec!["record:o-32"]);
    assert!(!harness.log.contains(LogLevel::Warn, "receive on"));
    assert_eq!(subscription.stats().receive_errors, 0);
}

#[test]
fn disposed_subscription_stops_receiving() {
    let harness = Harness::new();
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    assert!(wait_until(WAIT, || {
        harness
            .log
            .contains(LogLevel::Debug, "listening on sb://primary.test/orders")
    }));
    std::thread::sleep(Duration::from_millis(30));

    subscription.dispose();
    subscription.dispose();
    assert!(subscription.is_disposed());
    assert!(subscription.stats().polls > 0);
    assert!(subscription
        .dispatcher()
        .subscription("shop.orders.OrderPlaced")
        .is_none());

    let publisher = harness.bus.create_publisher("orders").unwrap();
    publisher.publish(&OrderPlaced::new("o-29")).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(harness.recorder.count(), 0);
    assert_eq!(harness.broker.active_message_count(PRIMARY_NS, "orders", "billing"), 1);
}

#[test]
fn subscription_on_both_namespaces_receives_after_failover() {
    let harness = Harness::with_passive();
    harness
        .container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&harness.recorder))));
    let subscription = harness.bus.add_subscription("orders", "billing", false).unwrap();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    assert_eq!(subscription.namespaces(), vec![PRIMARY_NS, SECONDARY_NS]);

    harness.broker.set_available(PRIMARY_NS, false);
    let publisher = harness.bus.create_publisher("orders").unwrap();
    publisher.publish(&OrderPlaced::new("o-30")).unwrap();

    assert!(wait_until(WAIT, || completed(&harness, SECONDARY_NS).len() == 1));
    assert_eq!(harness.recorder.calls(), vec!["record:o-30"]);
    assert!(harness.log.contains(
        LogLevel::Warn,
        "receive on sb://primary.test/orders/subscriptions/billing failed"
    ));
}
