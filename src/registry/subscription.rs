use std::any::Any;

use serde_json::Value;

use super::{HandlerType, SubscriberInfo};
use crate::json;
use crate::Event;

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error>;

/// The handler types registered for exactly one event type.
///
/// Handlers are invoked independently and in parallel, so insertion order
/// carries no meaning. Adding a present entry and removing an absent one
/// are both no-ops.
#[derive(Clone, Debug)]
pub struct Subscription {
    event_type: &'static str,
    decode: DecodeFn,
    subscribers: Vec<SubscriberInfo>,
}

impl Subscription {
    pub fn new<E: Event>() -> Self {
        Self {
            event_type: E::EVENT_TYPE,
            decode: decode::<E>,
            subscribers: Vec::new(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// Add `info`; returns `false` if it was already present.
    pub fn add(&mut self, info: SubscriberInfo) -> bool {
        if self.subscribers.contains(&info) {
            return false;
        }
        self.subscribers.push(info);
        true
    }

    /// Remove the entry for `handler`; returns `false` if it was absent.
    pub fn remove(&mut self, handler: &HandlerType) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.handler_type() != handler);
        self.subscribers.len() != before
    }

    pub fn contains(&self, handler: &HandlerType) -> bool {
        self.subscribers.iter().any(|s| s.handler_type() == handler)
    }

    pub fn subscribers(&self) -> &[SubscriberInfo] {
        &self.subscribers
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Decode a parsed payload into this subscription's event type.
    pub fn decode(&self, payload: Value) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> {
        (self.decode)(payload)
    }
}

fn decode<E: Event>(payload: Value) -> Result<Box<dyn Any + Send + Sync>, serde_json::Error> {
    let event: E = json::from_value(payload)?;
    Ok(Box::new(event))
}
