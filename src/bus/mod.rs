//! Broker-backed event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 BrokerEventBus (per host)                    │
//! │  active + passive connection, connector, resolver, identity  │
//! └───────────────┬──────────────────────────────┬───────────────┘
//!                 │ create_publisher(topic)      │ add_subscription(topic, name, sessions)
//!                 ▼                              ▼
//! ┌──────────────────────────────┐  ┌────────────────────────────────┐
//! │ BrokerEventPublisher         │  │ BrokerEventSubscription        │
//! │  5 attempts, 1 s apart       │  │  listeners (active + passive)  │
//! │  swap on failure, 30 min     │  │  → EventDispatcher → handlers  │
//! │  cooldown                    │  │  complete / abandon            │
//! └──────────────────────────────┘  └────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use topic_bus::broker::InMemoryBroker;
//! use topic_bus::handler::{EventSubscriber, HandlerContainer};
//! use topic_bus::identity::AnonymousUser;
//! use topic_bus::logging::TracingLog;
//! use topic_bus::{
//!     impl_event, BrokerEventBus, EventMeta, EventPublisher, EventSubscription, HandlerError,
//! };
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct OrderPlaced {
//!     meta: EventMeta,
//!     order_id: String,
//! }
//! impl_event!(OrderPlaced, "shop.orders.OrderPlaced");
//!
//! struct SendReceipt;
//! impl EventSubscriber<OrderPlaced> for SendReceipt {
//!     fn handle(&self, event: &OrderPlaced) -> Result<(), HandlerError> {
//!         println!("receipt for {}", event.order_id);
//!         Ok(())
//!     }
//! }
//!
//! let container = HandlerContainer::new();
//! container.register_instance(Arc::new(SendReceipt));
//!
//! let bus = BrokerEventBus::new(
//!     Arc::new(InMemoryBroker::new()),
//!     Arc::new(container),
//!     Arc::new(AnonymousUser),
//!     Arc::new(TracingLog),
//!     "Endpoint=sb://primary.example/",
//!     Some("Endpoint=sb://secondary.example/"),
//! )
//! .unwrap();
//!
//! let subscription = bus.add_subscription("orders", "receipts", false).unwrap();
//! subscription.add_subscription::<OrderPlaced, SendReceipt>();
//!
//! let publisher = bus.create_publisher("orders").unwrap();
//! publisher
//!     .publish(&OrderPlaced { meta: EventMeta::new(), order_id: "o-1".into() })
//!     .unwrap();
//! subscription.dispose();
//! ```

use std::sync::Arc;

use crate::broker::{BrokerConnector, ConnectionString};
use crate::config::{BusConfig, PublisherOptions, SubscriptionOptions};
use crate::error::{BrokerError, ConfigError, PublishError};
use crate::handler::HandlerResolver;
use crate::identity::UserProvider;
use crate::logging::Log;
use crate::publisher::BrokerEventPublisher;
use crate::subscription::{BrokerEventSubscription, SubscriptionTarget};

/// Creates publishers and subscriptions over one active/passive broker pair.
pub struct BrokerEventBus {
    connector: Arc<dyn BrokerConnector>,
    resolver: Arc<dyn HandlerResolver>,
    user_provider: Arc<dyn UserProvider>,
    log: Arc<dyn Log>,
    active: ConnectionString,
    passive: Option<String>,
    publisher_options: PublisherOptions,
    subscription_options: SubscriptionOptions,
}

impl BrokerEventBus {
    /// The active connection must parse; the passive one is checked per
    /// publisher and subscription.
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn HandlerResolver>,
        user_provider: Arc<dyn UserProvider>,
        log: Arc<dyn Log>,
        active: &str,
        passive: Option<&str>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            connector,
            resolver,
            user_provider,
            log,
            active: ConnectionString::parse(active)?,
            passive: passive.map(str::to_string),
            publisher_options: PublisherOptions::default(),
            subscription_options: SubscriptionOptions::default(),
        })
    }

    /// Build from a validated [`BusConfig`].
    pub fn from_config(
        config: &BusConfig,
        connector: Arc<dyn BrokerConnector>,
        resolver: Arc<dyn HandlerResolver>,
        user_provider: Arc<dyn UserProvider>,
        log: Arc<dyn Log>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            connector,
            resolver,
            user_provider,
            log,
            &config.active_connection,
            config.passive_connection.as_deref(),
        )?
        .with_publisher_options(config.publisher_options())
        .with_subscription_options(config.subscription_options()))
    }

    pub fn with_publisher_options(mut self, options: PublisherOptions) -> Self {
        self.publisher_options = options;
        self
    }

    pub fn with_subscription_options(mut self, options: SubscriptionOptions) -> Self {
        self.subscription_options = options;
        self
    }

    pub fn active_namespace(&self) -> &str {
        self.active.namespace()
    }

    /// A publisher for `topic`. Each publisher owns its own connection pair.
    pub fn create_publisher(&self, topic: &str) -> Result<BrokerEventPublisher, PublishError> {
        BrokerEventPublisher::new(
            self.connector.as_ref(),
            topic,
            &self.active,
            self.passive.as_deref(),
            Arc::clone(&self.user_provider),
            Arc::clone(&self.log),
            self.publisher_options,
        )
    }

    /// Start listening on `topic/subscriptions/subscription`.
    pub fn add_subscription(
        &self,
        topic: &str,
        subscription: &str,
        session_enabled: bool,
    ) -> Result<BrokerEventSubscription, BrokerError> {
        let mut target = SubscriptionTarget::new(topic, subscription);
        if session_enabled {
            target = target.with_sessions();
        }
        BrokerEventSubscription::new(
            self.connector.as_ref(),
            target,
            &self.active,
            self.passive.as_deref(),
            Arc::clone(&self.resolver),
            Arc::clone(&self.log),
            self.subscription_options,
        )
    }
}
