//! Broker adapter: the send/receive/settle primitives of the message broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────┐     ┌──────────────────────────────┐
//! │ BrokerEventPublisher       │     │ BrokerEventSubscription      │
//! │  retry + active/passive    │     │  listeners → EventDispatcher │
//! └─────────────┬──────────────┘     └──────────────┬───────────────┘
//!               ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ BrokerConnector: topic_client() / subscription_client()         │
//! │ TopicClient: send()          SubscriptionClient: receive()      │
//! │                              accept_session() → SessionReceiver │
//! │ MessageSettler: complete() / abandon() / renew_lock()           │
//! └─────────────────────────────────────────────────────────────────┘
//!               │                                   │
//!               ▼                                   ▼
//!        InMemoryBroker (included)        cloud broker SDK (external)
//! ```

mod connection;
#[cfg(feature = "memory")]
mod memory;
mod retry;

pub use connection::{passive_connection, ClientOptions, ConnectionString};
#[cfg(feature = "memory")]
pub use memory::{Fault, InMemoryBroker};
pub use retry::RetryExponential;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::BrokerError;
use crate::event::Envelope;

/// A message received under a peek-lock.
#[derive(Clone, Debug)]
pub struct ReceivedMessage {
    pub envelope: Envelope,
    pub locked_until: Instant,
}

impl ReceivedMessage {
    /// Lock token used to complete, abandon or renew this message.
    pub fn lock_token(&self) -> &str {
        self.envelope.lock_token().unwrap_or_default()
    }

    pub fn lock_expired(&self) -> bool {
        Instant::now() >= self.locked_until
    }

    pub fn delivery_count(&self) -> u32 {
        self.envelope
            .system
            .as_ref()
            .map(|s| s.delivery_count)
            .unwrap_or_default()
    }
}

/// Creates clients bound to one broker connection.
pub trait BrokerConnector: Send + Sync {
    fn topic_client(
        &self,
        connection: &ConnectionString,
        topic: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn TopicClient>, BrokerError>;

    fn subscription_client(
        &self,
        connection: &ConnectionString,
        topic: &str,
        subscription: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn SubscriptionClient>, BrokerError>;
}

/// Sends envelopes to one topic.
pub trait TopicClient: Send + Sync {
    /// Namespace (endpoint) this client is connected to.
    fn namespace(&self) -> &str;

    fn topic(&self) -> &str;

    /// Send one envelope. Transport-level retries happen inside the client.
    fn send(&self, envelope: &Envelope) -> Result<(), BrokerError>;

    fn close(&self);
}

/// Settles messages received under a lock.
pub trait MessageSettler: Send + Sync {
    /// Mark the message processed; it will not be delivered again.
    fn complete(&self, lock_token: &str) -> Result<(), BrokerError>;

    /// Release the lock so the message can be redelivered.
    fn abandon(&self, lock_token: &str) -> Result<(), BrokerError>;

    /// Extend the lock; returns the new expiry.
    fn renew_lock(&self, lock_token: &str) -> Result<Instant, BrokerError>;

    fn is_closed_or_closing(&self) -> bool;
}

/// Receives from one subscription of a topic.
pub trait SubscriptionClient: MessageSettler {
    fn namespace(&self) -> &str;

    /// `<topic>/subscriptions/<name>`
    fn entity_path(&self) -> String;

    /// Receive the next non-session message, waiting up to `timeout`.
    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError>;

    /// Lock the next available session, waiting up to `timeout`.
    fn accept_session(
        &self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn SessionReceiver>>, BrokerError>;

    fn close(&self);
}

/// An exclusively locked session.
pub trait SessionReceiver: MessageSettler {
    fn session_id(&self) -> &str;

    /// Receive the next message of this session in order.
    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError>;

    /// Release the session lock.
    fn close(&self);
}
