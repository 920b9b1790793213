//! Typed events, the event bus, and derived signals.
//!
//! Plugins never call each other directly. They emit typed [`Event`]s on a
//! shared [`EventBus`] and react to [`Signal`]s composed from those events.
//!
//! ```
//! use nextver_core::events::{Event, EventBus, Signal};
//!
//! # tokio_test_block(async {
//! let bus = EventBus::new();
//! let started: Event<u32> = Event::new("Started");
//! let ready: Event<&'static str> = Event::new("Ready");
//!
//! let seen = bus.signal_once(Signal::once(&started).zip(Signal::once(&ready)));
//! bus.emit(&ready, "now").await.unwrap();
//! assert!(seen.payload().is_none());
//! bus.emit(&started, 7).await.unwrap();
//! assert_eq!(seen.payload(), Some(&(7, "now")));
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod bus;
mod once;
mod signal;

pub use bus::{Event, EventBus, EventId, Payload};
pub use once::{OnceSignal, Signaled, all_signaled, any_unsignaled};
pub use signal::{Signal, Subscription};
