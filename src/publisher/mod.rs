//! Publishing events to a topic.
//!
//! [`BrokerEventPublisher`] sends through a broker with bounded retry and
//! active/passive failover; the in-process bus has its own publisher.

mod failover;
mod swap;

pub use failover::BrokerEventPublisher;
pub use swap::{SwapGate, SwapState};

use crate::error::PublishError;
use crate::Event;

/// Publishes typed events to one topic.
pub trait EventPublisher: Send + Sync {
    /// Topic this publisher sends to.
    fn topic(&self) -> &str;

    /// Publish `event`. Blocks until it is delivered or delivery is given up.
    fn publish<E: Event>(&self, event: &E) -> Result<(), PublishError>;
}
