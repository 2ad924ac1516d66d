use std::collections::HashMap;

use super::Subscription;
use crate::Event;

/// Event-type label → [`Subscription`].
///
/// One factory per subscription (or per in-process bus); factories never
/// share entries.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionFactory {
    subscriptions: HashMap<String, Subscription>,
}

impl SubscriptionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty subscription for `E`, replacing any existing one.
    pub fn create_subscriber_for_event<E: Event>(&mut self) -> &mut Subscription {
        let slot = self.subscription_for::<E>();
        *slot = Subscription::new::<E>();
        slot
    }

    /// The subscription for `E`, created if missing.
    pub fn subscription_for<E: Event>(&mut self) -> &mut Subscription {
        self.subscriptions
            .entry(E::EVENT_TYPE.to_string())
            .or_insert_with(Subscription::new::<E>)
    }

    pub fn get_subscriber_for_event(&self, event_type: &str) -> Option<&Subscription> {
        self.subscriptions.get(event_type)
    }

    pub fn get_subscriber_for_event_mut(&mut self, event_type: &str) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Remove every entry.
    pub fn dispose(&mut self) {
        self.subscriptions.clear();
    }
}
