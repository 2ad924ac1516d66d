//! Fan-out dispatcher shared by broker and in-process subscriptions.
//!
//! An envelope goes through: parse body, read identity properties,
//! re-establish identity, look up the label, decode the typed event, resolve
//! instances per handler type, run every instance on its own scoped thread,
//! and log each fault with its handler context. Handler faults never fail
//! the dispatch; envelope-processing failures do.

mod report;

pub use report::DispatchReport;

use std::any::Any;
use std::sync::{Arc, RwLock};
use std::thread;

use crate::error::{DispatchError, HandlerError};
use crate::event::{Envelope, AUTHENTICATION_TOKEN, USER};
use crate::handler::{EventSubscriber, HandlerResolver, Instance, ResolutionScope};
use crate::json;
use crate::logging::Log;
use crate::registry::{HandlerType, SubscriberInfo, Subscription, SubscriptionFactory};
use crate::sync::{read, write};
use crate::Event;

/// Routes events to the handlers registered for their label.
pub struct EventDispatcher {
    /// Subscription name used in log context
    name: String,
    registry: RwLock<SubscriptionFactory>,
    resolver: Arc<dyn HandlerResolver>,
    log: Arc<dyn Log>,
}

impl EventDispatcher {
    pub fn new(
        name: impl Into<String>,
        resolver: Arc<dyn HandlerResolver>,
        log: Arc<dyn Log>,
    ) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(SubscriptionFactory::new()),
            resolver,
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `H` for `E`. Returns `false` if the pairing already existed.
    pub fn add_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>,
    {
        let added = write(&self.registry)
            .subscription_for::<E>()
            .add(SubscriberInfo::new::<E, H>());
        if added {
            self.log.debug(&format!(
                "{}: subscribed {} to {}",
                self.name,
                HandlerType::of::<H>().name(),
                E::EVENT_TYPE
            ));
        }
        added
    }

    /// Unregister `H` from `E`. Returns `false` if it was not registered.
    pub fn remove_subscription<E, H>(&self) -> bool
    where
        E: Event,
        H: EventSubscriber<E>,
    {
        let mut registry = write(&self.registry);
        let removed = registry
            .get_subscriber_for_event_mut(E::EVENT_TYPE)
            .map(|subscription| subscription.remove(&HandlerType::of::<H>()))
            .unwrap_or(false);
        if removed {
            self.log.debug(&format!(
                "{}: unsubscribed {} from {}",
                self.name,
                HandlerType::of::<H>().name(),
                E::EVENT_TYPE
            ));
        }
        removed
    }

    /// A snapshot of the subscription registered for `event_type`.
    pub fn subscription(&self, event_type: &str) -> Option<Subscription> {
        read(&self.registry)
            .get_subscriber_for_event(event_type)
            .cloned()
    }

    /// Drop every registration.
    pub fn clear(&self) {
        write(&self.registry).dispose();
    }

    /// Process an envelope received from a broker.
    ///
    /// `Ok` means the message should be completed, whether or not individual
    /// handlers faulted. `Err` means the envelope itself could not be
    /// processed and must stay unacknowledged.
    pub fn dispatch_envelope(&self, envelope: &Envelope) -> Result<DispatchReport, DispatchError> {
        let result = self.process_envelope(envelope);
        if let Err(err) = &result {
            self.log.error_chain(
                err,
                &[
                    ("EventName", envelope.label.as_str()),
                    ("MessageId", envelope.message_id.as_str()),
                    ("Subscription", self.name.as_str()),
                    ("Reason", err.as_label()),
                ],
            );
        }
        result
    }

    fn process_envelope(&self, envelope: &Envelope) -> Result<DispatchReport, DispatchError> {
        let label = envelope.label.as_str();
        let payload = json::parse(&envelope.body).map_err(|source| {
            DispatchError::Deserialization {
                label: label.to_string(),
                source,
            }
        })?;
        let token = required_property(envelope, AUTHENTICATION_TOKEN)?;
        let user = required_property(envelope, USER)?;

        self.log.event(
            "EventReceived",
            &[
                ("EventName", label),
                ("MessageId", envelope.message_id.as_str()),
                ("Subscription", self.name.as_str()),
                ("User", user),
            ],
        );

        let scope = self.resolver.create_scope();
        for provider in scope.identity_providers() {
            if !provider.read_user_from_token(token) {
                self.log.warn(&format!(
                    "{}: could not establish identity of {} for message {}; dispatching anyway",
                    self.name, user, envelope.message_id
                ));
            }
        }

        let mut report = DispatchReport::new(label, Some(&envelope.message_id));
        let Some(subscription) = self.active_subscription(label) else {
            return Ok(report);
        };

        let event = subscription.decode(payload).map_err(|source| {
            DispatchError::Deserialization {
                label: label.to_string(),
                source,
            }
        })?;
        self.fan_out(&*event, &subscription, scope.as_ref(), &mut report);
        Ok(report)
    }

    /// Dispatch an event object directly, without an envelope.
    pub fn dispatch_local<E: Event>(&self, event: &E) -> DispatchReport {
        let mut report = DispatchReport::new(E::EVENT_TYPE, None);
        let Some(subscription) = self.active_subscription(E::EVENT_TYPE) else {
            return report;
        };
        let scope = self.resolver.create_scope();
        self.fan_out(event, &subscription, scope.as_ref(), &mut report);
        report
    }

    fn active_subscription(&self, event_type: &str) -> Option<Subscription> {
        match self.subscription(event_type) {
            Some(subscription) if !subscription.is_empty() => Some(subscription),
            _ => {
                self.log.debug(&format!(
                    "{}: no subscribers for {}",
                    self.name, event_type
                ));
                None
            }
        }
    }

    fn fan_out(
        &self,
        event: &(dyn Any + Send + Sync),
        subscription: &Subscription,
        scope: &dyn ResolutionScope,
        report: &mut DispatchReport,
    ) {
        let mut jobs: Vec<(&SubscriberInfo, Instance)> = Vec::new();
        for info in subscription.subscribers() {
            let instances = scope.resolve_all(info.handler_type());
            if instances.is_empty() {
                self.log.warn(&format!(
                    "{}: no instances resolved for {} handling {}",
                    self.name,
                    info.handler_type().name(),
                    subscription.event_type()
                ));
                report.unresolved.push(info.handler_type().name().to_string());
                continue;
            }
            jobs.extend(instances.into_iter().map(|instance| (info, instance)));
        }

        let outcomes: Vec<(&SubscriberInfo, Result<(), HandlerError>)> = thread::scope(|s| {
            let running: Vec<_> = jobs
                .iter()
                .map(|(info, instance)| {
                    let handle = s.spawn(move || info.invoke(&**instance, event));
                    (*info, handle)
                })
                .collect();
            running
                .into_iter()
                .map(|(info, handle)| {
                    let outcome = handle
                        .join()
                        .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));
                    (info, outcome)
                })
                .collect()
        });

        report.invoked += outcomes.len();
        for (info, outcome) in outcomes {
            if let Err(err) = outcome {
                self.log.error_chain(
                    &err,
                    &[
                        ("Handler", info.handler_type().name()),
                        ("SubscriberType", self.name.as_str()),
                        ("EventType", subscription.event_type()),
                    ],
                );
                report.faulted.push(info.handler_type().name().to_string());
            }
        }
    }
}

fn required_property<'a>(
    envelope: &'a Envelope,
    property: &'static str,
) -> Result<&'a str, DispatchError> {
    envelope
        .property(property)
        .ok_or_else(|| DispatchError::MissingProperty {
            message_id: envelope.message_id.clone(),
            property,
        })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

