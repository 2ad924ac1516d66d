//! Subscription registry: event-type label → registered handler types.
//!
//! Pure, synchronous and in-memory. The key is the stable
//! [`Event::EVENT_TYPE`](crate::Event::EVENT_TYPE) label, so a registration
//! made at startup matches envelopes decoded later from the wire. Each
//! [`SubscriberInfo`] carries the typed invoke function built at
//! registration, which forms the dispatch table used by the dispatcher.

mod factory;
mod subscriber;
mod subscription;

pub use factory::SubscriptionFactory;
pub use subscriber::{HandlerType, SubscriberInfo};
pub use subscription::Subscription;
