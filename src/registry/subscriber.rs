use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::HandlerError;
use crate::handler::EventSubscriber;
use crate::Event;

/// Identity of a handler type: its `TypeId` plus its name.
#[derive(Clone, Copy)]
pub struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    pub fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: type_name::<H>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for HandlerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for HandlerType {}

impl Hash for HandlerType {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type InvokeFn =
    fn(&(dyn Any + Send + Sync), &(dyn Any + Send + Sync)) -> Result<(), HandlerError>;

/// One (event type, handler type) pairing and the function that invokes
/// a resolved handler instance with a decoded event.
#[derive(Clone, Copy)]
pub struct SubscriberInfo {
    event_type: &'static str,
    handler: HandlerType,
    invoke: InvokeFn,
}

impl SubscriberInfo {
    pub fn new<E, H>() -> Self
    where
        E: Event,
        H: EventSubscriber<E>,
    {
        Self {
            event_type: E::EVENT_TYPE,
            handler: HandlerType::of::<H>(),
            invoke: invoke::<E, H>,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn handler_type(&self) -> &HandlerType {
        &self.handler
    }

    /// Run the handler. `instance` must be an `H` and `event` an `E`.
    pub fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        event: &(dyn Any + Send + Sync),
    ) -> Result<(), HandlerError> {
        (self.invoke)(instance, event)
    }
}

fn invoke<E, H>(
    instance: &(dyn Any + Send + Sync),
    event: &(dyn Any + Send + Sync),
) -> Result<(), HandlerError>
where
    E: Event,
    H: EventSubscriber<E>,
{
    let handler = instance.downcast_ref::<H>().ok_or_else(|| {
        HandlerError::failed(format!("resolved instance is not a {}", type_name::<H>()))
    })?;
    let event = event
        .downcast_ref::<E>()
        .ok_or_else(|| HandlerError::failed(format!("event is not a {}", E::EVENT_TYPE)))?;
    handler.handle(event)
}

// Registrations are the same entry when the handler type is the same.
impl PartialEq for SubscriberInfo {
    fn eq(&self, other: &Self) -> bool {
        self.handler == other.handler
    }
}

impl Eq for SubscriberInfo {}

impl fmt::Debug for SubscriberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberInfo")
            .field("event_type", &self.event_type)
            .field("handler", &self.handler)
            .finish()
    }
}
