use std::sync::Arc;

use topic_bus::logging::{LogLevel, MemoryLog};
use topic_bus::{EventPublisher, EventSubscription, HandlerContainer, InProcessBus};

use crate::support::{NotifyWarehouse, OrderPlaced, Recorder, RecordOrder, RejectOrder};

struct Fixture {
    recorder: Arc<Recorder>,
    log: MemoryLog,
    bus: InProcessBus,
}

fn fixture() -> Fixture {
    let recorder = Recorder::new();
    let container = HandlerContainer::new();
    container
        .register_instance(Arc::new(RecordOrder(Arc::clone(&recorder))))
        .register_instance(Arc::new(NotifyWarehouse(Arc::clone(&recorder))))
        .register_instance(Arc::new(RejectOrder(Arc::clone(&recorder))));
    let log = MemoryLog::new();
    let bus = InProcessBus::new(Arc::new(container), Arc::new(log.clone()));
    Fixture { recorder, log, bus }
}

#[test]
fn publish_without_subscription_is_a_no_op() {
    let f = fixture();
    let publisher = f.bus.create_publisher("orders");

    publisher.publish(&OrderPlaced::new("o-40")).unwrap();

    assert_eq!(f.recorder.count(), 0);
    assert!(f
        .log
        .contains(LogLevel::Debug, "no in-process subscription for topic orders"));
}

#[test]
fn publisher_created_before_subscription_delivers_once_it_exists() {
    let f = fixture();
    let publisher = f.bus.create_publisher("orders");
    publisher.publish(&OrderPlaced::new("o-41")).unwrap();

    let subscription = f.bus.create_subscription("orders");
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    publisher.publish(&OrderPlaced::new("o-42")).unwrap();

    assert_eq!(f.recorder.calls(), vec!["record:o-42"]);
}

#[test]
fn handler_fault_is_isolated() {
    let f = fixture();
    let subscription = f.bus.create_subscription("orders");
    subscription.add_subscription::<OrderPlaced, RejectOrder>();
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    subscription.add_subscription::<OrderPlaced, NotifyWarehouse>();

    f.bus
        .create_publisher("orders")
        .publish(&OrderPlaced::new("o-43"))
        .unwrap();

    let mut calls = f.recorder.calls();
    calls.sort();
    assert_eq!(calls, vec!["notify:o-43", "record:o-43", "reject:o-43"]);
    assert!(f.log.contains(LogLevel::Error, "order o-43 rejected"));
}

#[test]
fn disposing_the_subscription_detaches_the_topic() {
    let f = fixture();
    let publisher = f.bus.create_publisher("orders");
    let subscription = f.bus.create_subscription("orders");
    subscription.add_subscription::<OrderPlaced, RecordOrder>();

    subscription.dispose();
    publisher.publish(&OrderPlaced::new("o-44")).unwrap();

    assert_eq!(f.recorder.count(), 0);
    assert!(f.bus.topics().is_empty());
}

#[test]
fn disposed_bus_detaches_its_publishers() {
    let f = fixture();
    let publisher = f.bus.create_publisher("orders");
    let subscription = f.bus.create_subscription("orders");
    subscription.add_subscription::<OrderPlaced, RecordOrder>();
    assert!(publisher.is_attached());

    f.bus.dispose();

    assert!(!publisher.is_attached());
    publisher.publish(&OrderPlaced::new("o-45")).unwrap();
    assert_eq!(f.recorder.count(), 0);
}

#[test]
fn publisher_outliving_its_bus_logs_the_drop() {
    let Fixture { recorder, log, bus } = fixture();
    let publisher = bus.create_publisher("orders");
    let subscription = bus.create_subscription("orders");
    subscription.add_subscription::<OrderPlaced, RecordOrder>();

    drop(bus);
    publisher.publish(&OrderPlaced::new("o-46")).unwrap();

    assert!(!publisher.is_attached());
    assert_eq!(recorder.count(), 0);
    assert!(log.contains(
        LogLevel::Debug,
        "in-process bus for topic orders dropped"
    ));
}
