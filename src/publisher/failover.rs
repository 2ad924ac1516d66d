use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use super::{EventPublisher, SwapGate, SwapState};
use crate::broker::{passive_connection, BrokerConnector, ConnectionString, TopicClient};
use crate::config::PublisherOptions;
use crate::error::{BrokerError, PublishError};
use crate::event::Envelope;
use crate::identity::UserProvider;
use crate::json;
use crate::logging::Log;
use crate::sync::{lock, read, write};
use crate::Event;

struct Connections {
    active: Arc<dyn TopicClient>,
    passive: Option<Arc<dyn TopicClient>>,
}

/// Publisher over an active and an optional passive broker connection.
///
/// Each publish makes up to `max_send_attempts` sends on the active
/// connection. When they all fail and a passive connection exists, the
/// pair is swapped (at most once per `swap_cooldown`) and one more
/// delivery round runs on the new active connection with a fresh copy of
/// the envelope.
pub struct BrokerEventPublisher {
    topic: String,
    options: PublisherOptions,
    user_provider: Arc<dyn UserProvider>,
    log: Arc<dyn Log>,
    connections: RwLock<Connections>,
    gate: SwapGate,
    swap_lock: Mutex<()>,
}

impl BrokerEventPublisher {
    /// Connect to `active` and, when usable, to `passive`.
    ///
    /// A passive connection string that is missing, invalid, equal to the
    /// active one, or cannot be connected disables failover with a warning.
    pub fn new(
        connector: &dyn BrokerConnector,
        topic: &str,
        active: &ConnectionString,
        passive: Option<&str>,
        user_provider: Arc<dyn UserProvider>,
        log: Arc<dyn Log>,
        options: PublisherOptions,
    ) -> Result<Self, PublishError> {
        let active_client = connector.topic_client(active, topic, &options.client)?;
        let passive_client = match passive_connection(active, passive) {
            Ok(conn) => match connector.topic_client(&conn, topic, &options.client) {
                Ok(client) => Some(client),
                Err(err) => {
                    log.warn(&format!(
                        "failover disabled for topic {}: cannot connect to passive {}: {}",
                        topic, conn, err
                    ));
                    None
                }
            },
            Err(reason) => {
                log.warn(&format!("failover disabled for topic {}: {}", topic, reason));
                None
            }
        };

        Ok(Self {
            topic: topic.to_string(),
            options,
            user_provider,
            log,
            connections: RwLock::new(Connections {
                active: active_client,
                passive: passive_client,
            }),
            gate: SwapGate::new(options.swap_cooldown),
            swap_lock: Mutex::new(()),
        })
    }

    pub fn failover_enabled(&self) -> bool {
        read(&self.connections).passive.is_some()
    }

    pub fn active_namespace(&self) -> String {
        read(&self.connections).active.namespace().to_string()
    }

    pub fn passive_namespace(&self) -> Option<String> {
        read(&self.connections)
            .passive
            .as_ref()
            .map(|p| p.namespace().to_string())
    }

    pub fn swap_state(&self) -> SwapState {
        self.gate.state()
    }

    /// Close both connections.
    pub fn close(&self) {
        let connections = read(&self.connections);
        connections.active.close();
        if let Some(passive) = &connections.passive {
            passive.close();
        }
    }

    fn active(&self) -> Arc<dyn TopicClient> {
        Arc::clone(&read(&self.connections).active)
    }

    /// One delivery round: up to `max_send_attempts` sends with a fixed delay.
    fn deliver(&self, client: &dyn TopicClient, envelope: &Envelope) -> Result<(), BrokerError> {
        let attempts = self.options.max_send_attempts;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match client.send(envelope) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.log.warn(&format!(
                        "attempt {}/{} to send {} ({}) to {} failed: {}",
                        attempt,
                        attempts,
                        envelope.label,
                        envelope.message_id,
                        client.namespace(),
                        err
                    ));
                    last_error = Some(err);
                    if attempt < attempts {
                        thread::sleep(self.options.retry_delay);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BrokerError::Closed {
            entity: self.topic.clone(),
        }))
    }

    /// Swap active and passive unless a cooldown is running or another
    /// publish already swapped away from `failed`.
    fn swap_connections(&self, failed: &Arc<dyn TopicClient>) {
        if self.gate.cooldown_active() {
            self.log.warn(&format!(
                "skipping connection swap for topic {}: last swap is within the cooldown",
                self.topic
            ));
            return;
        }

        let _guard = lock(&self.swap_lock);
        if !same_client(&self.active(), failed) {
            self.log.info(&format!(
                "connections for topic {} were already swapped",
                self.topic
            ));
            return;
        }
        if let Err(state) = self.gate.begin() {
            self.log.warn(&format!(
                "skipping connection swap for topic {}: {:?}",
                self.topic, state
            ));
            return;
        }

        let (from, to) = {
            let mut connections = write(&self.connections);
            if let Some(passive) = connections.passive.take() {
                let previous = std::mem::replace(&mut connections.active, passive);
                connections.passive = Some(previous);
            }
            (
                failed.namespace().to_string(),
                connections.active.namespace().to_string(),
            )
        };
        self.gate.finish();
        self.log.warn(&format!(
            "swapped connections for topic {}: {} -> {}",
            self.topic, from, to
        ));
        self.log.event(
            "ConnectionSwapped",
            &[
                ("Topic", self.topic.as_str()),
                ("From", from.as_str()),
                ("To", to.as_str()),
            ],
        );
    }

    fn report_failure(&self, error: &PublishError, envelope: &Envelope) {
        self.log.error_chain(
            error,
            &[
                ("EventName", envelope.label.as_str()),
                ("Payload", envelope.body_str().unwrap_or_default()),
                ("EventId", envelope.message_id.as_str()),
                ("Reason", error.as_label()),
            ],
        );
    }
}

impl EventPublisher for BrokerEventPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish<E: Event>(&self, event: &E) -> Result<(), PublishError> {
        let payload = json::to_payload(event).map_err(|source| PublishError::Serialization {
            event_name: E::EVENT_TYPE.to_string(),
            source,
        })?;
        let user = self
            .user_provider
            .get_user()
            .map(|u| u.to_string())
            .unwrap_or_default();
        let envelope = Envelope::for_event(event, payload, self.user_provider.get_token(), user);

        self.log.event(
            "PublishEvent",
            &[
                ("EventName", E::EVENT_TYPE),
                ("MessageId", envelope.message_id.as_str()),
                ("Payload", envelope.body_str().unwrap_or_default()),
                ("Namespace", self.active().namespace()),
            ],
        );

        if !self.gate.wait_ready(self.options.swap_wait_timeout) {
            self.log.warn(&format!(
                "connection swap for topic {} still running; publishing {} anyway",
                self.topic, envelope.message_id
            ));
        }

        let active = self.active();

        let source = match self.deliver(active.as_ref(), &envelope) {
            Ok(()) => return Ok(()),
            Err(source) => source,
        };

        if !self.failover_enabled() {
            let error = PublishError::Delivery {
                event_name: E::EVENT_TYPE.to_string(),
                attempts: self.options.max_send_attempts,
                source,
            };
            self.report_failure(&error, &envelope);
            return Err(error);
        }

        self.swap_connections(&active);
        let retry = self.active();
        match self.deliver(retry.as_ref(), &envelope.fresh_copy()) {
            Ok(()) => {
                self.log.info(&format!(
                    "published {} ({}) via {} after failover",
                    E::EVENT_TYPE,
                    envelope.message_id,
                    retry.namespace()
                ));
                Ok(())
            }
            Err(source) => {
                let error = PublishError::Failover {
                    event_name: E::EVENT_TYPE.to_string(),
                    source,
                };
                self.report_failure(&error, &envelope);
                Err(error)
            }
        }
    }
}

impl Drop for BrokerEventPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

fn same_client(a: &Arc<dyn TopicClient>, b: &Arc<dyn TopicClient>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
