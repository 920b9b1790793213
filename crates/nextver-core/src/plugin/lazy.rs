use std::fmt;
use std::sync::{Arc, Mutex};

use super::{CapabilityId, ConsumerHandle, Disposable, PluginError, PluginRegistry, PluginResult};
use crate::sync::lock;

type Pending<C> = Box<dyn FnOnce(Arc<C>) + Send>;

struct LazyState<C: ?Sized> {
    value: Option<Arc<C>>,
    pending: Vec<Pending<C>>,
}

/// A handle to a capability that may not be registered yet.
///
/// Resolves from the registration that is current when the handle is created,
/// or else from the first matching registration afterwards. Once resolved it
/// stops listening to the registry.
pub struct LazyPlugin<C: ?Sized> {
    state: Mutex<LazyState<C>>,
    consumer: Mutex<Option<ConsumerHandle>>,
}

impl<C: ?Sized + Send + Sync + 'static> LazyPlugin<C> {
    pub(crate) fn new(registry: &PluginRegistry) -> Arc<Self> {
        let lazy = Arc::new(Self {
            state: Mutex::new(LazyState {
                value: None,
                pending: Vec::new(),
            }),
            consumer: Mutex::new(None),
        });

        if let Some(existing) = registry.get::<C>() {
            lazy.resolve(existing);
            return lazy;
        }

        let weak = Arc::downgrade(&lazy);
        let handle = registry.add_consumer(move |registration| {
            if registration.capability() != CapabilityId::of::<C>() {
                return;
            }
            if let (Some(lazy), Some(instance)) = (weak.upgrade(), registration.instance::<C>()) {
                lazy.resolve(instance);
            }
        });
        *lock(&lazy.consumer) = Some(handle);

        // A registration may have landed between the lookup and the consumer.
        if let Some(existing) = registry.get::<C>() {
            lazy.resolve(existing);
        }
        lazy
    }

    /// The resolved capability.
    pub fn value(&self) -> PluginResult<Arc<C>> {
        lock(&self.state)
            .value
            .clone()
            .ok_or(PluginError::NotRegistered {
                capability: CapabilityId::of::<C>().name(),
            })
    }

    /// Whether the capability has been resolved.
    pub fn is_registered(&self) -> bool {
        lock(&self.state).value.is_some()
    }

    /// Run `callback` with the capability: now if resolved, else on resolution.
    pub fn on_registered<F>(&self, callback: F)
    where
        F: FnOnce(Arc<C>) + Send + 'static,
    {
        let mut state = lock(&self.state);
        if let Some(value) = state.value.clone() {
            drop(state);
            callback(value);
            return;
        }
        state.pending.push(Box::new(callback));
    }

    fn resolve(&self, instance: Arc<C>) {
        let pending = {
            let mut state = lock(&self.state);
            if state.value.is_some() {
                None
            } else {
                state.value = Some(Arc::clone(&instance));
                Some(std::mem::take(&mut state.pending))
            }
        };
        if let Some(handle) = lock(&self.consumer).take() {
            handle.dispose();
        }
        for callback in pending.into_iter().flatten() {
            callback(Arc::clone(&instance));
        }
    }
}

impl<C: ?Sized> fmt::Debug for LazyPlugin<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyPlugin")
            .field("capability", &std::any::type_name::<C>())
            .field("registered", &lock(&self.state).value.is_some())
            .finish()
    }
}
