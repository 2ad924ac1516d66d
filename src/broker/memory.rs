//! In-memory broker for testing and single-process scenarios.
//!
//! Models the parts of a topic/subscription broker the bus relies on:
//!
//! - namespaces keyed by connection endpoint, each with its own topics
//! - fan-out of every sent envelope to each subscription of the topic
//! - peek-lock receive with expiry-based redelivery and delivery counts
//! - FIFO sessions with exclusive session locks
//! - fault injection (`set_available`, `inject_send_faults`)
//!
//! Envelopes are stored as binary frames, so every receive goes through a
//! real encode/decode boundary.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::{
    BrokerConnector, ClientOptions, ConnectionString, MessageSettler, ReceivedMessage,
    SessionReceiver, SubscriptionClient, TopicClient,
};
use crate::error::BrokerError;
use crate::event::{Envelope, SystemProperties};
use crate::sync::lock;

const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

/// A failure the broker can be told to produce on send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Unavailable,
    ServerBusy,
    Timeout,
}

impl Fault {
    fn to_error(self, namespace: &str) -> BrokerError {
        let namespace = namespace.to_string();
        match self {
            Fault::Unavailable => BrokerError::Unavailable { namespace },
            Fault::ServerBusy => BrokerError::ServerBusy { namespace },
            Fault::Timeout => BrokerError::Timeout { namespace },
        }
    }
}

/// In-memory broker. Clones share state.
///
/// ## Example
///
/// ```
/// use topic_bus::broker::{
///     BrokerConnector, ClientOptions, ConnectionString, InMemoryBroker, MessageSettler,
///     SubscriptionClient, TopicClient,
/// };
/// use topic_bus::Envelope;
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// let conn = ConnectionString::parse("Endpoint=sb://local/").unwrap();
/// broker.create_subscription(conn.namespace(), "orders", "billing");
///
/// let topic = broker.topic_client(&conn, "orders", &ClientOptions::default()).unwrap();
/// topic.send(&Envelope::new("m-1", "shop.OrderPlaced", b"{}".to_vec())).unwrap();
///
/// let sub = broker
///     .subscription_client(&conn, "orders", "billing", &ClientOptions::default())
///     .unwrap();
/// let msg = sub.receive(Duration::from_millis(50)).unwrap().unwrap();
/// assert_eq!(msg.envelope.label, "shop.OrderPlaced");
/// assert_eq!(msg.delivery_count(), 1);
/// sub.complete(msg.lock_token()).unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    arrived: Condvar,
    lock_duration: Duration,
}

#[derive(Default)]
struct State {
    namespaces: HashMap<String, Namespace>,
    next_sequence: u64,
}

struct Namespace {
    available: bool,
    send_faults: VecDeque<Fault>,
    receive_faults: VecDeque<Fault>,
    sent: Vec<Envelope>,
    topics: HashMap<String, Topic>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            available: true,
            send_faults: VecDeque::new(),
            receive_faults: VecDeque::new(),
            sent: Vec::new(),
            topics: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Topic {
    subscriptions: HashMap<String, Queue>,
}

#[derive(Clone)]
struct Stored {
    sequence: u64,
    frame: Vec<u8>,
    session_id: Option<String>,
    delivery_count: u32,
}

struct Locked {
    stored: Stored,
    until: Instant,
}

#[derive(Default)]
struct Queue {
    /// Ready messages ordered by sequence number
    ready: BTreeMap<u64, Stored>,
    /// In-flight messages by lock token
    locked: HashMap<String, Locked>,
    /// Locked sessions and their lock expiry
    sessions: HashMap<String, Instant>,
    /// Message ids of completed messages, in completion order
    completed: Vec<String>,
}

impl Queue {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .locked
            .iter()
            .filter(|(_, l)| l.until <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                self.ready.insert(locked.stored.sequence, locked.stored);
            }
        }
        self.sessions.retain(|_, until| *until > now);
    }

    fn session_in_flight(&self, session_id: &str) -> bool {
        self.locked
            .values()
            .any(|l| l.stored.session_id.as_deref() == Some(session_id))
    }

    fn lock_next<F>(&mut self, lock_duration: Duration, now: Instant, filter: F) -> Option<Received>
    where
        F: Fn(&Stored) -> bool,
    {
        let sequence = self
            .ready
            .iter()
            .find(|(_, stored)| filter(stored))
            .map(|(seq, _)| *seq)?;
        let mut stored = self.ready.remove(&sequence)?;
        stored.delivery_count += 1;
        let token = Uuid::new_v4().to_string();
        let until = now + lock_duration;
        self.locked.insert(
            token.clone(),
            Locked {
                stored: stored.clone(),
                until,
            },
        );
        Some(Received {
            stored,
            token,
            until,
        })
    }

    fn next_free_session(&self, now: Instant) -> Option<String> {
        self.ready
            .values()
            .filter_map(|stored| stored.session_id.as_deref())
            .find(|session| {
                let locked = self.sessions.get(*session).is_some_and(|until| *until > now);
                !locked && !self.session_in_flight(session)
            })
            .map(str::to_string)
    }

    fn complete(&mut self, lock_token: &str, now: Instant) -> Result<(), BrokerError> {
        match self.locked.remove(lock_token) {
            Some(locked) if locked.until > now => {
                if let Ok(envelope) = Envelope::decode_frame(&locked.stored.frame) {
                    self.completed.push(envelope.message_id);
                }
                Ok(())
            }
            Some(locked) => {
                self.ready.insert(locked.stored.sequence, locked.stored);
                Err(lock_lost(lock_token))
            }
            None => Err(lock_lost(lock_token)),
        }
    }

    fn abandon(&mut self, lock_token: &str) -> Result<(), BrokerError> {
        let locked = self
            .locked
            .remove(lock_token)
            .ok_or_else(|| lock_lost(lock_token))?;
        self.ready.insert(locked.stored.sequence, locked.stored);
        Ok(())
    }

    fn renew(
        &mut self,
        lock_token: &str,
        lock_duration: Duration,
        now: Instant,
    ) -> Result<Instant, BrokerError> {
        match self.locked.get_mut(lock_token) {
            Some(locked) if locked.until > now => {
                locked.until = now + lock_duration;
                Ok(locked.until)
            }
            _ => Err(lock_lost(lock_token)),
        }
    }
}

struct Received {
    stored: Stored,
    token: String,
    until: Instant,
}

impl Received {
    fn into_message(self) -> Result<ReceivedMessage, BrokerError> {
        let mut envelope = Envelope::decode_frame(&self.stored.frame).map_err(|_| {
            BrokerError::LockLost {
                lock_token: self.token.clone(),
            }
        })?;
        envelope.system = Some(SystemProperties {
            lock_token: self.token,
            delivery_count: self.stored.delivery_count,
            sequence_number: self.stored.sequence,
        });
        Ok(ReceivedMessage {
            envelope,
            locked_until: self.until,
        })
    }
}

fn lock_lost(lock_token: &str) -> BrokerError {
    BrokerError::LockLost {
        lock_token: lock_token.to_string(),
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_lock_duration(DEFAULT_LOCK_DURATION)
    }

    /// Create a broker whose message and session locks last `lock_duration`.
    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                arrived: Condvar::new(),
                lock_duration,
            }),
        }
    }

    pub fn lock_duration(&self) -> Duration {
        self.shared.lock_duration
    }

    /// Provision a subscription so it receives messages sent from now on.
    pub fn create_subscription(&self, namespace: &str, topic: &str, subscription: &str) {
        let mut state = self.state();
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .topics
            .entry(topic.to_string())
            .or_default()
            .subscriptions
            .entry(subscription.to_string())
            .or_default();
    }

    /// Make a namespace reachable or unreachable.
    pub fn set_available(&self, namespace: &str, available: bool) {
        let mut state = self.state();
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .available = available;
        drop(state);
        self.shared.arrived.notify_all();
    }

    /// Fail the next `count` sends to `namespace` with `fault`.
    pub fn inject_send_faults(&self, namespace: &str, count: usize, fault: Fault) {
        let mut state = self.state();
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        ns.send_faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Fail the next `count` receives or session accepts on `namespace` with `fault`.
    pub fn inject_receive_faults(&self, namespace: &str, count: usize, fault: Fault) {
        let mut state = self.state();
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        ns.receive_faults.extend(std::iter::repeat(fault).take(count));
    }

    /// Envelopes accepted by `namespace`, in send order.
    pub fn sent(&self, namespace: &str) -> Vec<Envelope> {
        self.state()
            .namespaces
            .get(namespace)
            .map(|ns| ns.sent.clone())
            .unwrap_or_default()
    }

    /// Envelopes accepted by `namespace` for `topic`, in send order.
    pub fn sent_to(&self, namespace: &str, topic: &str) -> Vec<Envelope> {
        self.sent(namespace)
            .into_iter()
            .filter(|e| e.property(TOPIC_PROPERTY) == Some(topic))
            .map(|mut e| {
                e.properties.remove(TOPIC_PROPERTY);
                e
            })
            .collect()
    }

    /// Ready plus in-flight messages of a subscription.
    pub fn active_message_count(&self, namespace: &str, topic: &str, subscription: &str) -> usize {
        self.with_queue(namespace, topic, subscription, |q| {
            q.ready.len() + q.locked.len()
        })
        .unwrap_or_default()
    }

    /// Message ids completed on a subscription, in completion order.
    pub fn completed(&self, namespace: &str, topic: &str, subscription: &str) -> Vec<String> {
        self.with_queue(namespace, topic, subscription, |q| q.completed.clone())
            .unwrap_or_default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }

    fn with_queue<T>(
        &self,
        namespace: &str,
        topic: &str,
        subscription: &str,
        f: impl FnOnce(&mut Queue) -> T,
    ) -> Option<T> {
        let mut state = self.state();
        state
            .namespaces
            .get_mut(namespace)?
            .topics
            .get_mut(topic)?
            .subscriptions
            .get_mut(subscription)
            .map(f)
    }

    fn send(&self, namespace: &str, topic: &str, envelope: &Envelope) -> Result<(), BrokerError> {
        let frame = envelope
            .fresh_copy()
            .encode_frame()
            .map_err(|_| BrokerError::Unavailable {
                namespace: namespace.to_string(),
            })?;

        let mut state = self.state();
        let sequence = state.next_sequence;
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        if !ns.available {
            return Err(Fault::Unavailable.to_error(namespace));
        }
        if let Some(fault) = ns.send_faults.pop_front() {
            return Err(fault.to_error(namespace));
        }

        ns.sent
            .push(envelope.fresh_copy().with_property(TOPIC_PROPERTY, topic));
        let topic = ns.topics.entry(topic.to_string()).or_default();
        for queue in topic.subscriptions.values_mut() {
            queue.ready.insert(
                sequence,
                Stored {
                    sequence,
                    frame: frame.clone(),
                    session_id: envelope.session_id.clone(),
                    delivery_count: 0,
                },
            );
        }
        state.next_sequence += 1;
        drop(state);
        self.shared.arrived.notify_all();
        Ok(())
    }

    /// Wait until `take` yields a value, the namespace fails, or `timeout`
    /// elapses.
    fn wait_for<T>(
        &self,
        address: &Address,
        timeout: Duration,
        mut take: impl FnMut(&mut Queue, Instant) -> Option<T>,
    ) -> Result<Option<T>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            let now = Instant::now();
            let ns = state.namespaces.entry(address.namespace.clone()).or_default();
            if !ns.available {
                return Err(Fault::Unavailable.to_error(&address.namespace));
            }
            if let Some(fault) = ns.receive_faults.pop_front() {
                return Err(fault.to_error(&address.namespace));
            }
            let queue = ns
                .topics
                .entry(address.topic.clone())
                .or_default()
                .subscriptions
                .entry(address.subscription.clone())
                .or_default();
            queue.reclaim_expired(now);
            if let Some(value) = take(queue, now) {
                return Ok(Some(value));
            }

            if now >= deadline {
                return Ok(None);
            }
            // Wake up at the earliest lock expiry too, so redelivery is timely.
            let wait = (deadline - now).min(self.shared.lock_duration);
            state = self
                .shared
                .arrived
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn settle<T>(
        &self,
        address: &Address,
        f: impl FnOnce(&mut Queue, Instant) -> Result<T, BrokerError>,
    ) -> Result<T, BrokerError> {
        let result = self
            .with_queue(&address.namespace, &address.topic, &address.subscription, |q| {
                f(q, Instant::now())
            })
            .unwrap_or_else(|| Err(BrokerError::Closed {
                entity: address.entity_path(),
            }));
        self.shared.arrived.notify_all();
        result
    }
}

/// Property used to remember the destination topic in the `sent` log.
const TOPIC_PROPERTY: &str = "x-topic";

#[derive(Clone)]
struct Address {
    namespace: String,
    topic: String,
    subscription: String,
}

impl Address {
    fn entity_path(&self) -> String {
        format!("{}/subscriptions/{}", self.topic, self.subscription)
    }
}

impl BrokerConnector for InMemoryBroker {
    fn topic_client(
        &self,
        connection: &ConnectionString,
        topic: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn TopicClient>, BrokerError> {
        Ok(Arc::new(InMemoryTopicClient {
            broker: self.clone(),
            namespace: connection.namespace().to_string(),
            topic: topic.to_string(),
            options: *options,
            closed: AtomicBool::new(false),
        }))
    }

    fn subscription_client(
        &self,
        connection: &ConnectionString,
        topic: &str,
        subscription: &str,
        options: &ClientOptions,
    ) -> Result<Arc<dyn SubscriptionClient>, BrokerError> {
        self.create_subscription(connection.namespace(), topic, subscription);
        Ok(Arc::new(InMemorySubscriptionClient {
            broker: self.clone(),
            address: Address {
                namespace: connection.namespace().to_string(),
                topic: topic.to_string(),
                subscription: subscription.to_string(),
            },
            options: *options,
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryTopicClient {
    broker: InMemoryBroker,
    namespace: String,
    topic: String,
    options: ClientOptions,
    closed: AtomicBool,
}

impl TopicClient for InMemoryTopicClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed {
                entity: self.topic.clone(),
            });
        }
        self.options
            .execute(|| self.broker.send(&self.namespace, &self.topic, envelope))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct InMemorySubscriptionClient {
    broker: InMemoryBroker,
    address: Address,
    options: ClientOptions,
    closed: AtomicBool,
}

impl InMemorySubscriptionClient {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed {
                entity: self.address.entity_path(),
            });
        }
        Ok(())
    }
}

impl MessageSettler for InMemorySubscriptionClient {
    fn complete(&self, lock_token: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.options.execute(|| {
            self.broker
                .settle(&self.address, |q, now| q.complete(lock_token, now))
        })
    }

    fn abandon(&self, lock_token: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.options
            .execute(|| self.broker.settle(&self.address, |q, _| q.abandon(lock_token)))
    }

    fn renew_lock(&self, lock_token: &str) -> Result<Instant, BrokerError> {
        self.ensure_open()?;
        let duration = self.broker.lock_duration();
        self.options.execute(|| {
            self.broker
                .settle(&self.address, |q, now| q.renew(lock_token, duration, now))
        })
    }

    fn is_closed_or_closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SubscriptionClient for InMemorySubscriptionClient {
    fn namespace(&self) -> &str {
        &self.address.namespace
    }

    fn entity_path(&self) -> String {
        self.address.entity_path()
    }

    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        let duration = self.broker.lock_duration();
        self.options
            .execute(|| {
                self.broker.wait_for(&self.address, timeout, |q, now| {
                    q.lock_next(duration, now, |_| true)
                })
            })?
            .map(Received::into_message)
            .transpose()
    }

    fn accept_session(
        &self,
        timeout: Duration,
    ) -> Result<Option<Box<dyn SessionReceiver>>, BrokerError> {
        self.ensure_open()?;
        let duration = self.broker.lock_duration();
        let session = self.options.execute(|| {
            self.broker.wait_for(&self.address, timeout, |q, now| {
                let session = q.next_free_session(now)?;
                q.sessions.insert(session.clone(), now + duration);
                Some(session)
            })
        })?;

        Ok(session.map(|session_id| {
            Box::new(InMemorySessionReceiver {
                broker: self.broker.clone(),
                address: self.address.clone(),
                session_id,
                options: self.options,
                closed: AtomicBool::new(false),
            }) as Box<dyn SessionReceiver>
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct InMemorySessionReceiver {
    broker: InMemoryBroker,
    address: Address,
    session_id: String,
    options: ClientOptions,
    closed: AtomicBool,
}

impl InMemorySessionReceiver {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::SessionLockLost {
                session_id: self.session_id.clone(),
            });
        }
        Ok(())
    }

    fn holds_session(&self, queue: &Queue, now: Instant) -> bool {
        queue
            .sessions
            .get(&self.session_id)
            .is_some_and(|until| *until > now)
    }
}

impl MessageSettler for InMemorySessionReceiver {
    fn complete(&self, lock_token: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.options.execute(|| {
            self.broker
                .settle(&self.address, |q, now| q.complete(lock_token, now))
        })
    }

    fn abandon(&self, lock_token: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.options
            .execute(|| self.broker.settle(&self.address, |q, _| q.abandon(lock_token)))
    }

    fn renew_lock(&self, lock_token: &str) -> Result<Instant, BrokerError> {
        self.ensure_open()?;
        let duration = self.broker.lock_duration();
        self.options.execute(|| {
            self.broker.settle(&self.address, |q, now| {
                let until = q.renew(lock_token, duration, now)?;
                q.sessions.insert(self.session_id.clone(), until);
                Ok(until)
            })
        })
    }

    fn is_closed_or_closing(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SessionReceiver for InMemorySessionReceiver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn receive(&self, timeout: Duration) -> Result<Option<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        let duration = self.broker.lock_duration();
        let mut lost = false;
        let received = self.options.execute(|| {
            self.broker.wait_for(&self.address, timeout, |q, now| {
                if !self.holds_session(q, now) {
                    lost = true;
                    return Some(None);
                }
                let session = self.session_id.as_str();
                q.lock_next(duration, now, |s| s.session_id.as_deref() == Some(session))
                    .map(Some)
            })
        })?;

        if lost {
            return Err(BrokerError::SessionLockLost {
                session_id: self.session_id.clone(),
            });
        }
        received.flatten().map(Received::into_message).transpose()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let session_id = self.session_id.clone();
        let _ = self.broker.settle(&self.address, |q, _| {
            q.sessions.remove(&session_id);
            Ok(())
        });
    }
}

impl Drop for InMemorySessionReceiver {
    fn drop(&mut self) {
        SessionReceiver::close(self);
    }
}
