use std::sync::{Arc, Weak};

use super::BusState;
use crate::error::PublishError;
use crate::logging::Log;
use crate::publisher::EventPublisher;
use crate::Event;

/// Publishes straight into the subscription registered for its topic.
pub struct InProcessPublisher {
    topic: String,
    bus: Weak<BusState>,
    log: Arc<dyn Log>,
}

impl InProcessPublisher {
    pub(crate) fn new(topic: &str, bus: Weak<BusState>, log: Arc<dyn Log>) -> Self {
        Self {
            topic: topic.to_string(),
            bus,
            log,
        }
    }

    /// Whether the bus this publisher was created by is still live.
    pub fn is_attached(&self) -> bool {
        self.bus.upgrade().is_some_and(|bus| !bus.is_disposed())
    }
}

impl EventPublisher for InProcessPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    /// Dispatch synchronously. A topic without a subscription, or a
    /// detached publisher, is a logged no-op; handler faults are logged by
    /// the dispatcher.
    fn publish<E: Event>(&self, event: &E) -> Result<(), PublishError> {
        let Some(bus) = self.bus.upgrade() else {
            self.log.debug(&format!(
                "in-process bus for topic {} dropped; {} not delivered",
                self.topic,
                E::EVENT_TYPE
            ));
            return Ok(());
        };
        match bus.dispatcher_for(&self.topic) {
            Some(dispatcher) => {
                let report = dispatcher.dispatch_local(event);
                bus.log().trace(&format!(
                    "in-process {} on {}: {} invoked, {} faulted",
                    E::EVENT_TYPE,
                    self.topic,
                    report.invoked,
                    report.faulted.len()
                ));
            }
            None => bus.log().debug(&format!(
                "no in-process subscription for topic {}; {} not delivered",
                self.topic,
                E::EVENT_TYPE
            )),
        }
        Ok(())
    }
}
