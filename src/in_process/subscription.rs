use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::BusState;
use crate::dispatch::EventDispatcher;
use crate::handler::EventSubscriber;
use crate::subscription::EventSubscription;
use crate::Event;

/// Subscription on an in-process topic. Dropping it unregisters it.
pub struct InProcessSubscription {
    topic: String,
    dispatcher: Arc<EventDispatcher>,
    bus: Weak<BusState>,
    disposed: AtomicBool,
}

impl InProcessSubscription {
    pub(crate) fn new(topic: &str, dispatcher: Arc<EventDispatcher>, bus: Weak<BusState>) -> Self {
        Self {
            topic: topic.to_string(),
            dispatcher,
            bus,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

impl EventSubscription for InProcessSubscription {
    fn add_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>,
    {
        self.dispatcher.add_subscription::<E, H>()
    }

    fn remove_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>,
    {
        self.dispatcher.remove_subscription::<E, H>()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(&self.topic, &self.dispatcher);
        }
        self.dispatcher.clear();
    }
}

impl Drop for InProcessSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
