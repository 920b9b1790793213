use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::sync::lock;

type Service = Arc<dyn Any + Send + Sync>;

/// Type-keyed singletons that plugins publish for each other during
/// `ConfigureServices`.
#[derive(Default)]
pub struct ServiceRegistrar {
    services: Mutex<HashMap<TypeId, (&'static str, Service)>>,
}

impl ServiceRegistrar {
    /// No services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `service` as the singleton of type `S`, replacing any earlier
    /// one.
    pub fn add_singleton<S: ?Sized + Send + Sync + 'static>(&self, service: Arc<S>) {
        let name = std::any::type_name::<S>();
        let service: Service = Arc::new(service);
        let previous = lock(&self.services).insert(TypeId::of::<S>(), (name, service));
        debug!(service = name, replaced = previous.is_some(), "service added");
    }

    /// The singleton of type `S`, if published.
    pub fn get<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        lock(&self.services)
            .get(&TypeId::of::<S>())
            .and_then(|(_, service)| service.downcast_ref::<Arc<S>>())
            .cloned()
    }

    /// Whether a singleton of type `S` is published.
    pub fn contains<S: ?Sized + 'static>(&self) -> bool {
        lock(&self.services).contains_key(&TypeId::of::<S>())
    }

    /// Number of published services.
    pub fn len(&self) -> usize {
        lock(&self.services).len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ServiceRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services = lock(&self.services);
        let mut names: Vec<&str> = services.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_struct("ServiceRegistrar")
            .field("services", &names)
            .finish()
    }
}
