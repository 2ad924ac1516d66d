use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{HandlerResolver, Instance, ResolutionScope};
use crate::identity::IdentityProvider;
use crate::registry::HandlerType;
use crate::sync::{lock, read, write};

type Factory = Arc<dyn Fn() -> Instance + Send + Sync>;
type IdentityFactory = Arc<dyn Fn() -> Arc<dyn IdentityProvider> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    /// One instance shared by every scope
    Singleton(Instance),
    /// A new instance per scope
    Scoped(Factory),
}

#[derive(Default)]
struct Registrations {
    handlers: HashMap<HandlerType, Vec<Registration>>,
    identity: Vec<IdentityFactory>,
}

/// A small handler container.
///
/// Several registrations per handler type are allowed; `resolve_all`
/// returns them in registration order. Clones share registrations.
///
/// ```
/// use std::sync::Arc;
/// use topic_bus::handler::{HandlerContainer, HandlerResolver, ResolutionScope};
/// use topic_bus::registry::HandlerType;
///
/// struct Audit;
///
/// let container = HandlerContainer::new();
/// container.register_instance(Arc::new(Audit));
/// container.register_scoped(|| Audit);
///
/// let scope = container.create_scope();
/// assert_eq!(scope.resolve_all(&HandlerType::of::<Audit>()).len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct HandlerContainer {
    registrations: Arc<RwLock<Registrations>>,
}

impl HandlerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared instance of `H`.
    pub fn register_instance<H>(&self, handler: Arc<H>) -> &Self
    where
        H: Send + Sync + 'static,
    {
        self.push(HandlerType::of::<H>(), Registration::Singleton(handler));
        self
    }

    /// Register a factory creating a new `H` for every scope.
    pub fn register_scoped<H, F>(&self, factory: F) -> &Self
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Arc::new(factory()) as Instance);
        self.push(HandlerType::of::<H>(), Registration::Scoped(factory));
        self
    }

    /// Register a factory for an identity provider created once per scope.
    pub fn register_identity<F>(&self, factory: F) -> &Self
    where
        F: Fn() -> Arc<dyn IdentityProvider> + Send + Sync + 'static,
    {
        write(&self.registrations).identity.push(Arc::new(factory));
        self
    }

    /// Number of registrations for `handler`.
    pub fn registrations(&self, handler: &HandlerType) -> usize {
        read(&self.registrations)
            .handlers
            .get(handler)
            .map(Vec::len)
            .unwrap_or_default()
    }

    fn push(&self, handler: HandlerType, registration: Registration) {
        write(&self.registrations)
            .handlers
            .entry(handler)
            .or_default()
            .push(registration);
    }
}

impl HandlerResolver for HandlerContainer {
    fn create_scope(&self) -> Box<dyn ResolutionScope> {
        let registrations = read(&self.registrations);
        Box::new(ContainerScope {
            handlers: registrations.handlers.clone(),
            identity: registrations.identity.iter().map(|f| f()).collect(),
            resolved: Mutex::new(HashMap::new()),
        })
    }
}

struct ContainerScope {
    handlers: HashMap<HandlerType, Vec<Registration>>,
    identity: Vec<Arc<dyn IdentityProvider>>,
    resolved: Mutex<HashMap<HandlerType, Vec<Instance>>>,
}

impl ResolutionScope for ContainerScope {
    fn resolve_all(&self, handler: &HandlerType) -> Vec<Instance> {
        let mut resolved = lock(&self.resolved);
        if let Some(instances) = resolved.get(handler) {
            return instances.clone();
        }

        let instances: Vec<Instance> = self
            .handlers
            .get(handler)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|registration| match registration {
                        Registration::Singleton(instance) => Arc::clone(instance),
                        Registration::Scoped(factory) => factory(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        resolved.insert(*handler, instances.clone());
        instances
    }

    fn identity_providers(&self) -> Vec<Arc<dyn IdentityProvider>> {
        self.identity.clone()
    }
}
