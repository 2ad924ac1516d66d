//! Subscriptions: handler registration plus the listeners feeding the
//! dispatcher.

mod listener;

pub use listener::{spawn_listener, ListenerHandle, ListenerStats, ReceiveMode};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::broker::{passive_connection, BrokerConnector, ConnectionString, SubscriptionClient};
use crate::config::SubscriptionOptions;
use crate::dispatch::EventDispatcher;
use crate::error::BrokerError;
use crate::handler::{EventSubscriber, HandlerResolver};
use crate::logging::Log;
use crate::sync::lock;
use crate::Event;

/// Registers handlers for the events arriving on one subscription.
///
/// Registration is idempotent and takes effect for the next message.
pub trait EventSubscription: Send + Sync {
    /// Register `H` for `E`. Returns `false` if it was already registered.
    fn add_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>;

    /// Unregister `H` from `E`. Returns `false` if it was not registered.
    fn remove_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>;

    /// Stop receiving and clear every registration.
    fn dispose(&self);
}

/// Topic, subscription name and receive mode of a broker subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTarget {
    pub topic: String,
    pub subscription: String,
    pub mode: ReceiveMode,
}

impl SubscriptionTarget {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            mode: ReceiveMode::PeekLock,
        }
    }

    /// Receive in session mode (ordered per session id).
    pub fn with_sessions(mut self) -> Self {
        self.mode = ReceiveMode::Sessions;
        self
    }

    /// `<topic>/subscriptions/<name>`
    pub fn entity_path(&self) -> String {
        format!("{}/subscriptions/{}", self.topic, self.subscription)
    }
}

/// A subscription fed by listeners on the active namespace and, when
/// configured, the passive one.
pub struct BrokerEventSubscription {
    target: SubscriptionTarget,
    dispatcher: Arc<EventDispatcher>,
    clients: Vec<Arc<dyn SubscriptionClient>>,
    listeners: Mutex<Vec<ListenerHandle>>,
    stats: Mutex<ListenerStats>,
    disposed: AtomicBool,
    log: Arc<dyn Log>,
}

impl BrokerEventSubscription {
    pub fn new(
        connector: &dyn BrokerConnector,
        target: SubscriptionTarget,
        active: &ConnectionString,
        passive: Option<&str>,
        resolver: Arc<dyn HandlerResolver>,
        log: Arc<dyn Log>,
        options: SubscriptionOptions,
    ) -> Result<Self, BrokerError> {
        let dispatcher = Arc::new(EventDispatcher::new(
            target.entity_path(),
            resolver,
            Arc::clone(&log),
        ));

        let mut clients = vec![connector.subscription_client(
            active,
            &target.topic,
            &target.subscription,
            &options.client,
        )?];
        match passive_connection(active, passive) {
            Ok(conn) => match connector.subscription_client(
                &conn,
                &target.topic,
                &target.subscription,
                &options.client,
            ) {
                Ok(client) => clients.push(client),
                Err(err) => log.warn(&format!(
                    "{}: not listening on passive {}: {}",
                    target.entity_path(),
                    conn,
                    err
                )),
            },
            Err(reason) => log.debug(&format!(
                "{}: listening on the active namespace only ({})",
                target.entity_path(),
                reason
            )),
        }

        let listeners = clients
            .iter()
            .map(|client| {
                spawn_listener(
                    Arc::clone(client),
                    Arc::clone(&dispatcher),
                    Arc::clone(&log),
                    options,
                    target.mode,
                )
            })
            .collect();

        Ok(Self {
            target,
            dispatcher,
            clients,
            listeners: Mutex::new(listeners),
            stats: Mutex::new(ListenerStats::default()),
            disposed: AtomicBool::new(false),
            log,
        })
    }

    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Namespaces this subscription listens on, active first.
    pub fn namespaces(&self) -> Vec<String> {
        self.clients
            .iter()
            .map(|c| c.namespace().to_string())
            .collect()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Stats of listeners stopped so far (all of them after `dispose`).
    pub fn stats(&self) -> ListenerStats {
        lock(&self.stats).clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl EventSubscription for BrokerEventSubscription {
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
        let listeners: Vec<ListenerHandle> = lock(&self.listeners).drain(..).collect();
        for listener in &listeners {
            listener.signal_stop();
        }
        let mut total = ListenerStats::default();
        for listener in listeners {
            total.merge(&listener.stop());
        }
        for client in &self.clients {
            client.close();
        }
        self.dispatcher.clear();
        self.log.debug(&format!(
            "{}: disposed after {} received, {} completed",
            self.target.entity_path(),
            total.received,
            total.completed
        ));
        lock(&self.stats).merge(&total);
    }
}

impl Drop for BrokerEventSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
