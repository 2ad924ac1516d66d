//! Typed publish/subscribe over a topic/subscription message broker.
//!
//! - [`BrokerEventBus`] creates publishers with bounded retry and
//!   active/passive failover, and subscriptions that fan each message out
//!   to every registered handler.
//! - [`in_process::InProcessBus`] offers the same contract without a broker.
//! - [`broker::InMemoryBroker`] (feature `memory`) stands in for a real
//!   broker in tests and single-process setups.

pub mod broker;
pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
mod event;
pub mod handler;
pub mod identity;
pub mod in_process;
pub mod json;
pub mod logging;
pub mod publisher;
pub mod registry;
pub mod subscription;
mod sync;

pub use bus::BrokerEventBus;
pub use config::{BusConfig, PublisherOptions, SubscriptionOptions};
pub use dispatch::{DispatchReport, EventDispatcher};
pub use error::{BoxError, BrokerError, ConfigError, DispatchError, HandlerError, PublishError};
pub use event::{
    Envelope, Event, EventMeta, SessionMeta, SystemProperties, AUTHENTICATION_TOKEN, USER,
};
pub use handler::{EventSubscriber, HandlerContainer, HandlerResolver, ResolutionScope};
pub use in_process::{InProcessBus, InProcessPublisher, InProcessSubscription};
pub use publisher::{BrokerEventPublisher, EventPublisher};
pub use subscription::{
    BrokerEventSubscription, EventSubscription, ListenerHandle, ListenerStats, ReceiveMode,
};
