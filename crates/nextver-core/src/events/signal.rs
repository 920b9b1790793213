use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use super::bus::{Event, EventBus, Mode, ObserverKey, Payload, Sink};
use super::once::OnceSignal;
use crate::plugin::{Disposable, PluginResult};
use crate::sync::lock;

type AttachFn<T> = dyn Fn(&Arc<Attachment>, Sink<T>) + Send + Sync;

fn completed() -> BoxFuture<'static, PluginResult<()>> {
    Box::pin(futures::future::ready(Ok(())))
}

fn forward<T>(sink: &Sink<T>, value: Option<T>) -> BoxFuture<'static, PluginResult<()>> {
    match value {
        Some(value) => sink(value),
        None => completed(),
    }
}

/// Every bus observer a single subscription attached.
///
/// Closing is final: observers that combinators would attach later (the
/// deferred side of [`Signal::once_first`]) are refused once closed.
pub(crate) struct Attachment {
    bus: EventBus,
    state: Mutex<AttachmentState>,
}

#[derive(Default)]
struct AttachmentState {
    keys: Vec<ObserverKey>,
    closed: bool,
}

impl Attachment {
    fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(AttachmentState::default()),
        }
    }

    fn observe<P: Payload>(&self, event: &Event<P>, mode: Mode, sink: Sink<P>) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        let key = self.bus.observe(event, mode, sink);
        state.keys.push(key);
    }

    fn close(&self) {
        let keys = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.keys)
        };
        for key in keys {
            self.bus.detach(key);
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

/// A cold description of "when to react".
///
/// A signal does nothing until it is handed to [`EventBus::subscribe`]; each
/// subscription attaches its own observers, so one signal value can be
/// subscribed many times independently.
pub struct Signal<T> {
    attach: Arc<AttachFn<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            attach: Arc::clone(&self.attach),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Payload> Signal<T> {
    fn from_fn<F>(attach: F) -> Self
    where
        F: Fn(&Arc<Attachment>, Sink<T>) + Send + Sync + 'static,
    {
        Self {
            attach: Arc::new(attach),
        }
    }

    /// Fires for the first emission of `event`, then never again.
    pub fn once(event: &Event<T>) -> Self {
        let event = *event;
        Self::from_fn(move |attachment, sink| attachment.observe(&event, Mode::Once, sink))
    }

    /// Fires for every emission of `event`.
    pub fn every(event: &Event<T>) -> Self {
        let event = *event;
        Self::from_fn(move |attachment, sink| attachment.observe(&event, Mode::Every, sink))
    }

    /// Pairs the latest payload of each side.
    ///
    /// Fires whenever one side arrives while the other side has already
    /// produced a value; a side that fires again replaces its stored value.
    /// Zipping two `once` signals therefore fires exactly once, in whichever
    /// order they arrive.
    pub fn zip<U: Payload>(self, other: Signal<U>) -> Signal<(T, U)> {
        Signal::from_fn(move |attachment, sink: Sink<(T, U)>| {
            let latest: Arc<Mutex<(Option<T>, Option<U>)>> = Arc::default();

            let left: Sink<T> = {
                let latest = Arc::clone(&latest);
                let sink = Arc::clone(&sink);
                Arc::new(move |value: T| -> BoxFuture<'static, PluginResult<()>> {
                    let pair = {
                        let mut latest = lock(&latest);
                        latest.0 = Some(value.clone());
                        latest.1.clone().map(|other| (value, other))
                    };
                    forward(&sink, pair)
                })
            };
            let right: Sink<U> = Arc::new(move |value: U| -> BoxFuture<'static, PluginResult<()>> {
                let pair = {
                    let mut latest = lock(&latest);
                    latest.1 = Some(value.clone());
                    latest.0.clone().map(|other| (other, value))
                };
                forward(&sink, pair)
            });

            (self.attach)(attachment, left);
            (other.attach)(attachment, right);
        })
    }

    /// Waits for this signal to fire once, then for the next emission of
    /// `event`.
    ///
    /// Emissions of `event` before the first firing of `self` are ignored,
    /// and later firings of `self` do not re-arm it. The payload pairs the
    /// firing of `self` with the event's payload.
    pub fn once_first<E: Payload>(self, event: &Event<E>) -> Signal<(T, E)> {
        let event = *event;
        Signal::from_fn(move |attachment, sink: Sink<(T, E)>| {
            let armed = Arc::new(AtomicBool::new(false));
            let deferred = Arc::clone(attachment);
            let on_gate: Sink<T> = Arc::new(move |gate: T| -> BoxFuture<'static, PluginResult<()>> {
                if !armed.swap(true, Ordering::AcqRel) {
                    let sink = Arc::clone(&sink);
                    deferred.observe(
                        &event,
                        Mode::Once,
                        Arc::new(move |payload: E| -> BoxFuture<'static, PluginResult<()>> {
                            sink((gate.clone(), payload))
                        }),
                    );
                }
                completed()
            });
            (self.attach)(attachment, on_gate);
        })
    }

    /// Transforms the payload.
    pub fn map<U, F>(self, transform: F) -> Signal<U>
    where
        U: Payload,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        Signal::from_fn(move |attachment, sink: Sink<U>| {
            let transform = Arc::clone(&transform);
            (self.attach)(
                attachment,
                Arc::new(move |value: T| -> BoxFuture<'static, PluginResult<()>> {
                    sink(transform(value))
                }),
            );
        })
    }
}

/// Disposable handle for one subscription.
///
/// Dropping the handle leaves the subscription active; call
/// [`Disposable::dispose`] (or hand it to a plugin's lifecycle) to detach.
pub struct Subscription {
    attachment: Arc<Attachment>,
}

impl Subscription {
    /// Whether the subscription has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.attachment.is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Disposable for Subscription {
    fn dispose(&self) {
        self.attachment.close();
    }
}

impl EventBus {
    /// Run `continuation` each time `signal` fires.
    ///
    /// The emitter awaits the continuation, so a suspending continuation
    /// delays the emission that triggered it.
    pub fn subscribe<T, F, Fut>(&self, signal: Signal<T>, continuation: F) -> Subscription
    where
        T: Payload,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        let attachment = Arc::new(Attachment::new(self.clone()));
        let sink: Sink<T> = Arc::new(move |value: T| -> BoxFuture<'static, PluginResult<()>> {
            Box::pin(continuation(value))
        });
        (signal.attach)(&attachment, sink);
        Subscription { attachment }
    }

    /// [`subscribe`](Self::subscribe) with a synchronous continuation.
    pub fn subscribe_sync<T, F>(&self, signal: Signal<T>, continuation: F) -> Subscription
    where
        T: Payload,
        F: Fn(T) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.subscribe(signal, move |value| futures::future::ready(continuation(value)))
    }

    /// Bind `signal` to a fresh [`OnceSignal`] that captures its first firing.
    pub fn signal_once<T: Payload>(&self, signal: Signal<T>) -> Arc<OnceSignal<T>> {
        let once = Arc::new(OnceSignal::new());
        let target = Arc::clone(&once);
        // The observers stay attached for the lifetime of the bus.
        let _subscription = self.subscribe_sync(signal, move |value| {
            target.signal(value);
            Ok(())
        });
        once
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginError;
    use std::sync::atomic::AtomicUsize;

    fn recorder<T: Payload>() -> (
        Arc<Mutex<Vec<T>>>,
        impl Fn(T) -> PluginResult<()> + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: T| {
            lock(&sink).push(value);
            Ok(())
        })
    }

    #[tokio::test]
    async fn once_fires_exactly_once_with_first_payload() {
        let bus = EventBus::new();
        let event: Event<u32> = Event::new("Numbers");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::once(&event), record);

        for n in [1, 2, 3] {
            bus.emit(&event, n).await.unwrap();
        }

        assert_eq!(*lock(&seen), vec![1]);
        assert_eq!(bus.observer_count(&event), 0);
    }

    #[tokio::test]
    async fn every_fires_for_each_emission() {
        let bus = EventBus::new();
        let event: Event<u32> = Event::new("Numbers");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::every(&event), record);

        for n in [1, 2, 3] {
            bus.emit(&event, n).await.unwrap();
        }

        assert_eq!(*lock(&seen), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn zip_of_two_once_signals_fires_once_in_either_order() {
        for left_first in [true, false] {
            let bus = EventBus::new();
            let a: Event<&'static str> = Event::new("A");
            let b: Event<u8> = Event::new("B");
            let (seen, record) = recorder();
            let _sub = bus.subscribe_sync(Signal::once(&a).zip(Signal::once(&b)), record);

            if left_first {
                bus.emit(&a, "a").await.unwrap();
                bus.emit(&b, 1).await.unwrap();
            } else {
                bus.emit(&b, 1).await.unwrap();
                bus.emit(&a, "a").await.unwrap();
            }
            bus.emit(&a, "again").await.unwrap();
            bus.emit(&b, 2).await.unwrap();

            assert_eq!(*lock(&seen), vec![("a", 1)], "left_first = {left_first}");
        }
    }

    #[tokio::test]
    async fn zip_keeps_latest_value_of_repeating_side() {
        let bus = EventBus::new();
        let a: Event<u8> = Event::new("A");
        let b: Event<u8> = Event::new("B");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::every(&a).zip(Signal::once(&b)), record);

        bus.emit(&a, 1).await.unwrap();
        bus.emit(&a, 2).await.unwrap();
        bus.emit(&b, 10).await.unwrap();
        bus.emit(&a, 3).await.unwrap();

        assert_eq!(*lock(&seen), vec![(2, 10), (3, 10)]);
    }

    #[tokio::test]
    async fn once_first_ignores_event_before_gate() {
        let bus = EventBus::new();
        let gate: Event<&'static str> = Event::new("Gate");
        let event: Event<u8> = Event::new("Event");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::once(&gate).once_first(&event), record);

        bus.emit(&event, 1).await.unwrap();
        bus.emit(&gate, "open").await.unwrap();
        assert!(lock(&seen).is_empty());

        bus.emit(&event, 2).await.unwrap();
        bus.emit(&event, 3).await.unwrap();
        assert_eq!(*lock(&seen), vec![("open", 2)]);
    }

    #[tokio::test]
    async fn once_first_does_not_rearm_on_later_gate_firings() {
        let bus = EventBus::new();
        let gate: Event<u8> = Event::new("Gate");
        let event: Event<()> = Event::new("Event");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::every(&gate).once_first(&event), record);

        bus.emit(&gate, 1).await.unwrap();
        bus.emit(&gate, 2).await.unwrap();
        bus.emit(&event, ()).await.unwrap();
        bus.emit(&gate, 3).await.unwrap();
        bus.emit(&event, ()).await.unwrap();

        assert_eq!(*lock(&seen), vec![(1, ())]);
    }

    #[tokio::test]
    async fn map_transforms_payload() {
        let bus = EventBus::new();
        let event: Event<u8> = Event::new("Raw");
        let (seen, record) = recorder();
        let _sub = bus.subscribe_sync(Signal::every(&event).map(|n| format!("#{n}")), record);

        bus.emit(&event, 4).await.unwrap();
        assert_eq!(*lock(&seen), vec!["#4".to_string()]);
    }

    #[tokio::test]
    async fn disposed_subscription_stops_receiving() {
        let bus = EventBus::new();
        let event: Event<u8> = Event::new("Tick");
        let (seen, record) = recorder();
        let sub = bus.subscribe_sync(Signal::every(&event), record);

        bus.emit(&event, 1).await.unwrap();
        sub.dispose();
        bus.emit(&event, 2).await.unwrap();

        assert!(sub.is_disposed());
        assert_eq!(*lock(&seen), vec![1]);
        assert_eq!(bus.observer_count(&event), 0);
    }

    #[tokio::test]
    async fn disposing_before_gate_prevents_deferred_attach() {
        let bus = EventBus::new();
        let gate: Event<()> = Event::new("Gate");
        let event: Event<()> = Event::new("Event");
        let (seen, record) = recorder();
        let sub = bus.subscribe_sync(Signal::every(&gate).once_first(&event), record);

        sub.dispose();
        bus.emit(&gate, ()).await.unwrap();
        bus.emit(&event, ()).await.unwrap();

        assert!(lock(&seen).is_empty());
        assert_eq!(bus.observer_count(&event), 0);
    }

    #[tokio::test]
    async fn suspending_continuation_is_awaited_by_emitter() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("Slow");
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let _sub = bus.subscribe(Signal::once(&event), move |()| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.emit(&event, ()).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn continuation_error_reaches_emitter() {
        let bus = EventBus::new();
        let event: Event<()> = Event::new("Broken");
        let _sub = bus.subscribe_sync(Signal::once(&event), |()| {
            Err(PluginError::InvalidState("handler failed".into()))
        });

        let err = bus.emit(&event, ()).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidState(_)));
    }

    #[tokio::test]
    async fn signal_once_captures_first_firing() {
        let bus = EventBus::new();
        let event: Event<u8> = Event::new("Value");
        let once = bus.signal_once(Signal::every(&event));
        assert!(once.payload().is_none());

        bus.emit(&event, 5).await.unwrap();
        bus.emit(&event, 6).await.unwrap();
        assert_eq!(once.payload(), Some(&5));
    }
}
