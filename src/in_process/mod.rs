//! Broker-free bus for same-process publish/subscribe.
//!
//! A publisher calls the dispatcher of the subscription registered for its
//! topic directly, passing the event by reference. The bus only keeps
//! non-owning references: dropping a subscription unregisters it, and
//! disposing the bus detaches every publisher.

mod publisher;
mod subscription;

pub use publisher::InProcessPublisher;
pub use subscription::InProcessSubscription;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::dispatch::EventDispatcher;
use crate::handler::HandlerResolver;
use crate::logging::Log;
use crate::sync::{read, write};

pub(crate) struct BusState {
    subscriptions: RwLock<HashMap<String, Weak<EventDispatcher>>>,
    disposed: AtomicBool,
    log: Arc<dyn Log>,
}

impl BusState {
    /// Live dispatcher for `topic`, if any.
    pub(crate) fn dispatcher_for(&self, topic: &str) -> Option<Arc<EventDispatcher>> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        read(&self.subscriptions).get(topic).and_then(Weak::upgrade)
    }

    /// Remove `topic` if it still maps to `dispatcher`.
    pub(crate) fn unregister(&self, topic: &str, dispatcher: &Arc<EventDispatcher>) {
        let mut subscriptions = write(&self.subscriptions);
        let current = subscriptions
            .get(topic)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(dispatcher)));
        if current {
            subscriptions.remove(topic);
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn log(&self) -> &dyn Log {
        self.log.as_ref()
    }
}

/// In-process bus. Dropping it disposes it.
///
/// ```
/// use std::sync::Arc;
/// use serde::{Deserialize, Serialize};
/// use topic_bus::handler::{EventSubscriber, HandlerContainer};
/// use topic_bus::in_process::InProcessBus;
/// use topic_bus::logging::TracingLog;
/// use topic_bus::{impl_event, EventMeta, EventPublisher, EventSubscription, HandlerError};
///
/// #[derive(Serialize, Deserialize)]
/// struct Pinged {
///     meta: EventMeta,
/// }
/// impl_event!(Pinged, "demo.Pinged");
///
/// struct Pong;
/// impl EventSubscriber<Pinged> for Pong {
///     fn handle(&self, _event: &Pinged) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
///
/// let container = HandlerContainer::new();
/// container.register_instance(Arc::new(Pong));
///
/// let bus = InProcessBus::new(Arc::new(container), Arc::new(TracingLog));
/// let publisher = bus.create_publisher("pings");
/// let subscription = bus.create_subscription("pings");
/// subscription.add_subscription::<Pinged, Pong>();
///
/// publisher.publish(&Pinged { meta: EventMeta::new() }).unwrap();
/// ```
pub struct InProcessBus {
    state: Arc<BusState>,
    resolver: Arc<dyn HandlerResolver>,
}

impl InProcessBus {
    pub fn new(resolver: Arc<dyn HandlerResolver>, log: Arc<dyn Log>) -> Self {
        Self {
            state: Arc::new(BusState {
                subscriptions: RwLock::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                log,
            }),
            resolver,
        }
    }

    /// A publisher for `topic`, attached to this bus until it is disposed.
    pub fn create_publisher(&self, topic: &str) -> InProcessPublisher {
        InProcessPublisher::new(
            topic,
            Arc::downgrade(&self.state),
            Arc::clone(&self.state.log),
        )
    }

    /// A subscription receiving what publishers of `topic` publish.
    ///
    /// A later subscription for the same topic replaces this one.
    pub fn create_subscription(&self, topic: &str) -> InProcessSubscription {
        let dispatcher = Arc::new(EventDispatcher::new(
            format!("in-process/{}", topic),
            Arc::clone(&self.resolver),
            Arc::clone(&self.state.log),
        ));
        let replaced = write(&self.state.subscriptions)
            .insert(topic.to_string(), Arc::downgrade(&dispatcher))
            .is_some_and(|previous| previous.strong_count() > 0);
        if replaced {
            self.state.log.warn(&format!(
                "in-process topic {} already had a subscription; replacing it",
                topic
            ));
        }
        InProcessSubscription::new(topic, dispatcher, Arc::downgrade(&self.state))
    }

    /// Topics with a live subscription.
    pub fn topics(&self) -> Vec<String> {
        read(&self.state.subscriptions)
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Detach every publisher and forget every topic. Publishers and
    /// subscriptions stay usable objects but no longer exchange events.
    pub fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        write(&self.state.subscriptions).clear();
        self.state.log.debug("in-process bus disposed");
    }
}

impl Drop for InProcessBus {
    fn drop(&mut self) {
        self.dispose();
    }
}
