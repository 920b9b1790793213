use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::trace;

use crate::plugin::PluginResult;
use crate::sync::lock;

/// Bound shared by every event payload.
///
/// A payload is cloned once per observer, so cheap-to-clone payloads (or
/// `Arc`s) are preferred.
pub trait Payload: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Payload for T {}

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// A typed event identity.
///
/// Two events are the same event only if they were created by the same call
/// to [`Event::new`]; the name is for diagnostics.
pub struct Event<P> {
    id: EventId,
    name: &'static str,
    _payload: PhantomData<fn(P)>,
}

impl<P> Event<P> {
    /// Allocate a new event identity.
    pub fn new(name: &'static str) -> Self {
        Self {
            id: EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            _payload: PhantomData,
        }
    }

    /// The identity this event is compared by.
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Diagnostic name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Event<P> {}

impl<P> PartialEq for Event<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<P> Eq for Event<P> {}

impl<P> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id.0)
            .field("name", &self.name)
            .finish()
    }
}

/// Type-erased observer continuation.
pub(crate) type Sink<T> = Arc<dyn Fn(T) -> BoxFuture<'static, PluginResult<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Once,
    Every,
}

/// Handle to one observer registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ObserverKey {
    event: EventId,
    key: u64,
}

struct Observer<P> {
    key: u64,
    mode: Mode,
    sink: Sink<P>,
}

trait ObserverTable: Send {
    fn remove(&mut self, key: u64);
    fn is_empty(&self) -> bool;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<P: Payload> ObserverTable for Vec<Observer<P>> {
    fn remove(&mut self, key: u64) {
        self.retain(|observer| observer.key != key);
    }

    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct Tables {
    next_key: u64,
    events: HashMap<EventId, Box<dyn ObserverTable>>,
}

/// Process-local publish/subscribe hub.
///
/// Cloning is cheap; every clone shares the same observer tables.
#[derive(Clone, Default)]
pub struct EventBus {
    tables: Arc<Mutex<Tables>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = lock(&self.tables);
        f.debug_struct("EventBus")
            .field("events", &tables.events.len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every observer of `event`.
    ///
    /// Observers run one after another in registration order and the call
    /// completes once all of them have. The first failing observer aborts the
    /// emission and its error is returned. Observers added while an emission
    /// is in flight are not part of it.
    pub async fn emit<P: Payload>(&self, event: &Event<P>, payload: P) -> PluginResult<()> {
        let sinks: Vec<Sink<P>> = {
            let mut tables = lock(&self.tables);
            let observers = tables
                .events
                .get_mut(&event.id())
                .and_then(|table| table.as_any_mut().downcast_mut::<Vec<Observer<P>>>());
            match observers {
                Some(observers) => {
                    let sinks = observers
                        .iter()
                        .map(|observer| Arc::clone(&observer.sink))
                        .collect();
                    observers.retain(|observer| observer.mode == Mode::Every);
                    sinks
                }
                None => Vec::new(),
            }
        };

        trace!(event = event.name(), observers = sinks.len(), "emitting");
        for sink in sinks {
            sink(payload.clone()).await?;
        }
        Ok(())
    }

    /// Number of observers currently attached to `event`.
    pub fn observer_count<P: Payload>(&self, event: &Event<P>) -> usize {
        let mut tables = lock(&self.tables);
        tables
            .events
            .get_mut(&event.id())
            .and_then(|table| table.as_any_mut().downcast_mut::<Vec<Observer<P>>>())
            .map_or(0, |observers| observers.len())
    }

    pub(crate) fn observe<P: Payload>(
        &self,
        event: &Event<P>,
        mode: Mode,
        sink: Sink<P>,
    ) -> ObserverKey {
        let mut tables = lock(&self.tables);
        tables.next_key += 1;
        let key = tables.next_key;
        let table = tables
            .events
            .entry(event.id())
            .or_insert_with(|| Box::new(Vec::<Observer<P>>::new()));
        if let Some(observers) = table.as_any_mut().downcast_mut::<Vec<Observer<P>>>() {
            observers.push(Observer { key, mode, sink });
        }
        ObserverKey {
            event: event.id(),
            key,
        }
    }

    pub(crate) fn detach(&self, key: ObserverKey) {
        let mut tables = lock(&self.tables);
        let emptied = match tables.events.get_mut(&key.event) {
            Some(table) => {
                table.remove(key.key);
                table.is_empty()
            }
            None => false,
        };
        if emptied {
            tables.events.remove(&key.event);
        }
    }
}
