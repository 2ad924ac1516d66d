//! Handlers and how instances are resolved for each inbound message.
//!
//! A [`HandlerResolver`] hands out one [`ResolutionScope`] per message so
//! handler state never leaks between messages. [`HandlerContainer`] is the
//! bundled resolver; hosts with their own composition root implement the
//! two traits instead.

mod container;

pub use container::HandlerContainer;

use std::any::Any;
use std::sync::Arc;

use crate::error::HandlerError;
use crate::identity::IdentityProvider;
use crate::registry::HandlerType;
use crate::Event;

/// Handles events of type `E`.
pub trait EventSubscriber<E: Event>: Send + Sync + 'static {
    fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// A resolved handler instance. The concrete type is the registered handler type.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Instances resolved for a single message.
pub trait ResolutionScope: Send + Sync {
    /// Every instance registered for `handler`, in registration order. May be empty.
    fn resolve_all(&self, handler: &HandlerType) -> Vec<Instance>;

    /// Providers that re-establish the publisher's identity for this scope.
    fn identity_providers(&self) -> Vec<Arc<dyn IdentityProvider>>;
}

/// Creates a fresh [`ResolutionScope`] per message.
pub trait HandlerResolver: Send + Sync {
    fn create_scope(&self) -> Box<dyn ResolutionScope>;
}
