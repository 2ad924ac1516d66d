use std::sync::Arc;

use topic_bus::logging::MemoryLog;
use topic_bus::{EventDispatcher, EventSubscription, HandlerContainer, InProcessBus};

use crate::support::{NotifyWarehouse, OrderPlaced, Recorder, RecordOrder};

fn dispatcher(name: &str, container: &HandlerContainer) -> EventDispatcher {
    EventDispatcher::new(
        name,
        Arc::new(container.clone()),
        Arc::new(MemoryLog::new()),
    )
}

#[test]
fn duplicate_registration_keeps_one_entry() {
    let recorder = Recorder::new();
    let container = HandlerContainer::new();
    container.register_instance(Arc::new(RecordOrder(Arc::clone(&recorder))));
    let dispatcher = dispatcher("orders/subscriptions/billing", &container);

    assert!(dispatcher.add_subscription::<OrderPlaced, RecordOrder>());
    assert!(!dispatcher.add_subscription::<OrderPlaced, RecordOrder>());

    let subscription = dispatcher.subscription("shop.orders.OrderPlaced").unwrap();
    assert_eq!(subscription.len(), 1);

    let report = dispatcher.dispatch_local(&OrderPlaced::new("o-1"));
    assert_eq!(report.invoked, 1);
    assert_eq!(recorder.calls(), vec!["record:o-1"]);
}

#[test]
fn removing_an_absent_handler_changes_nothing() {
    let container = HandlerContainer::new();
    let dispatcher = dispatcher("orders/subscriptions/billing", &container);

    assert!(!dispatcher.remove_subscription::<OrderPlaced, RecordOrder>());
    assert!(dispatcher.subscription("shop.orders.OrderPlaced").is_none());

    dispatcher.add_subscription::<OrderPlaced, RecordOrder>();
    assert!(!dispatcher.remove_subscription::<OrderPlaced, NotifyWarehouse>());
    assert_eq!(
        dispatcher
            .subscription("shop.orders.OrderPlaced")
            .map(|s| s.len()),
        Some(1)
    );

    assert!(dispatcher.remove_subscription::<OrderPlaced, RecordOrder>());
    let report = dispatcher.dispatch_local(&OrderPlaced::new("o-2"));
    assert_eq!(report.invoked, 0);
}

#[test]
fn registries_are_isolated_per_subscription() {
    let recorder = Recorder::new();
    let container = HandlerContainer::new();
    container.register_instance(Arc::new(RecordOrder(Arc::clone(&recorder))));
    container.register_instance(Arc::new(NotifyWarehouse(Arc::clone(&recorder))));

    let billing = dispatcher("orders/subscriptions/billing", &container);
    let shipping = dispatcher("orders/subscriptions/shipping", &container);
    billing.add_subscription::<OrderPlaced, RecordOrder>();
    shipping.add_subscription::<OrderPlaced, NotifyWarehouse>();

    billing.dispatch_local(&OrderPlaced::new("o-3"));
    assert_eq!(recorder.calls(), vec!["record:o-3"]);

    shipping.remove_subscription::<OrderPlaced, NotifyWarehouse>();
    assert_eq!(
        billing
            .subscription("shop.orders.OrderPlaced")
            .map(|s| s.len()),
        Some(1)
    );
}

#[test]
fn in_process_subscriptions_on_different_topics_do_not_share_handlers() {
    let recorder = Recorder::new();
    let container = HandlerContainer::new();
    container.register_instance(Arc::new(RecordOrder(Arc::clone(&recorder))));
    let bus = InProcessBus::new(Arc::new(container), Arc::new(MemoryLog::new()));

    let orders = bus.create_subscription("orders");
    let returns = bus.create_subscription("returns");
    orders.add_subscription::<OrderPlaced, RecordOrder>();

    assert_eq!(
        orders
            .dispatcher()
            .subscription("shop.orders.OrderPlaced")
            .map(|s| s.len()),
        Some(1)
    );
    assert!(returns
        .dispatcher()
        .subscription("shop.orders.OrderPlaced")
        .is_none());
}
