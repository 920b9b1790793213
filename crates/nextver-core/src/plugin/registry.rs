use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use super::{Disposable, LazyPlugin, Plugin, PluginError, PluginResult};
use crate::sync::lock;

/// Identity of a capability a plugin can provide.
///
/// Usually a trait object type such as `dyn VersionCacheService`, sometimes
/// a concrete plugin type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityId {
    type_id: TypeId,
    name: &'static str,
}

impl CapabilityId {
    /// The identity of capability type `C`.
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    /// The capability's type name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One plugin registered under one capability.
#[derive(Clone)]
pub struct PluginRegistration {
    capability: CapabilityId,
    plugin: Arc<dyn Plugin>,
    // Holds an `Arc<C>` for the registered capability type `C`.
    instance: Arc<dyn Any + Send + Sync>,
}

impl PluginRegistration {
    /// The capability this registration provides.
    pub fn capability(&self) -> CapabilityId {
        self.capability
    }

    /// The plugin behind the capability.
    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    /// The capability handle, if `C` is the registered capability type.
    pub fn instance<C: ?Sized + 'static>(&self) -> Option<Arc<C>> {
        self.instance.downcast_ref::<Arc<C>>().cloned()
    }
}

impl fmt::Debug for PluginRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistration")
            .field("capability", &self.capability)
            .field("plugin", &self.plugin.name())
            .finish()
    }
}

type Consumer = Arc<dyn Fn(&PluginRegistration) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    registrations: Vec<PluginRegistration>,
    consumers: Vec<(u64, Consumer)>,
    next_consumer: u64,
}

/// Capability-keyed set of plugins.
///
/// A capability can be provided by one plugin only; a second registration
/// for the same capability is rejected and the first stays current.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(lock(&self.state).registrations.iter())
            .finish()
    }
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` as the provider of capability `C`.
    ///
    /// Consumers are notified after the registry lock is released, so they
    /// may call back into the registry.
    pub fn register<C>(&self, capability: Arc<C>, plugin: Arc<dyn Plugin>) -> PluginResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        let id = CapabilityId::of::<C>();
        let (registration, consumers) = {
            let mut state = lock(&self.state);
            if state.registrations.iter().any(|r| r.capability == id) {
                warn!(capability = id.name(), plugin = plugin.name(), "duplicate registration rejected");
                return Err(PluginError::DuplicateRegistration {
                    capability: id.name(),
                });
            }
            let registration = PluginRegistration {
                capability: id,
                plugin,
                instance: Arc::new(capability),
            };
            state.registrations.push(registration.clone());
            let consumers: Vec<Consumer> = state
                .consumers
                .iter()
                .map(|(_, consumer)| Arc::clone(consumer))
                .collect();
            (registration, consumers)
        };

        debug!(
            capability = id.name(),
            plugin = registration.plugin.name(),
            consumers = consumers.len(),
            "plugin registered"
        );
        for consumer in consumers {
            consumer(&registration);
        }
        Ok(())
    }

    /// Call `consumer` for every registration made from now on, until the
    /// returned handle is disposed.
    pub fn add_consumer<F>(&self, consumer: F) -> ConsumerHandle
    where
        F: Fn(&PluginRegistration) + Send + Sync + 'static,
    {
        let mut state = lock(&self.state);
        state.next_consumer += 1;
        let id = state.next_consumer;
        state.consumers.push((id, Arc::new(consumer)));
        ConsumerHandle {
            registry: Arc::downgrade(&self.state),
            id,
            disposed: AtomicBool::new(false),
        }
    }

    /// The current provider of capability `C`.
    pub fn get<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        let id = CapabilityId::of::<C>();
        lock(&self.state)
            .registrations
            .iter()
            .find(|r| r.capability == id)
            .and_then(PluginRegistration::instance::<C>)
    }

    /// A handle that resolves once capability `C` is registered.
    pub fn lazy<C: ?Sized + Send + Sync + 'static>(&self) -> Arc<LazyPlugin<C>> {
        LazyPlugin::new(self)
    }

    /// Every registration, in registration order.
    pub fn registrations(&self) -> Vec<PluginRegistration> {
        lock(&self.state).registrations.clone()
    }

    /// Every registered plugin, in registration order.
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        lock(&self.state)
            .registrations
            .iter()
            .map(|r| Arc::clone(&r.plugin))
            .collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        lock(&self.state).registrations.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Detaches a registry consumer when disposed.
pub struct ConsumerHandle {
    registry: Weak<Mutex<RegistryState>>,
    id: u64,
    disposed: AtomicBool,
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("id", &self.id)
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl Disposable for ConsumerHandle {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(state) = self.registry.upgrade() {
            lock(&state).consumers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Lifecycle;
    use std::sync::atomic::AtomicUsize;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello {
        lifecycle: Lifecycle,
        word: &'static str,
    }

    impl Hello {
        fn new(word: &'static str) -> Arc<Self> {
            Arc::new(Self {
                lifecycle: Lifecycle::new("hello"),
                word,
            })
        }
    }

    impl Plugin for Hello {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }
    }

    impl Greeter for Hello {
        fn greet(&self) -> String {
            self.word.to_string()
        }
    }

    fn register_greeter(registry: &PluginRegistry, word: &'static str) -> PluginResult<()> {
        let hello = Hello::new(word);
        registry.register::<dyn Greeter>(hello.clone(), hello)
    }

    #[test]
    fn register_and_get_by_capability() {
        let registry = PluginRegistry::new();
        register_greeter(&registry, "hi").unwrap();

        let greeter = registry.get::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "hi");
        assert!(registry.get::<Hello>().is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected_and_first_stays() {
        let registry = PluginRegistry::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let _consumer = registry.add_consumer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        register_greeter(&registry, "first").unwrap();
        let err = register_greeter(&registry, "second").unwrap_err();

        assert!(matches!(err, PluginError::DuplicateRegistration { .. }));
        assert_eq!(registry.get::<dyn Greeter>().unwrap().greet(), "first");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_consumer_is_not_called() {
        let registry = PluginRegistry::new();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let consumer = registry.add_consumer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        consumer.dispose();
        consumer.dispose();
        register_greeter(&registry, "hi").unwrap();

        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn consumer_may_reenter_registry() {
        let registry = PluginRegistry::new();
        let inner = registry.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _consumer = registry.add_consumer(move |registration| {
            let greeting = inner.get::<dyn Greeter>().map(|g| g.greet());
            lock(&sink).push((registration.capability().name(), greeting));
        });

        register_greeter(&registry, "hey").unwrap();

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.as_deref(), Some("hey"));
    }

    #[test]
    fn plugins_are_listed_in_registration_order() {
        let registry = PluginRegistry::new();
        register_greeter(&registry, "a").unwrap();
        let other = Hello::new("b");
        registry.register::<Hello>(other.clone(), other).unwrap();

        let names: Vec<_> = registry
            .registrations()
            .iter()
            .map(|r| r.capability().name().to_string())
            .collect();
        assert!(names[0].contains("Greeter"));
        assert!(names[1].contains("Hello"));
        assert_eq!(registry.plugins().len(), 2);
    }
}
