use std::fmt;
use std::sync::OnceLock;

use tokio::sync::Notify;

/// Anything that can report whether it has fired.
pub trait Signaled {
    /// Whether it has fired.
    fn is_signaled(&self) -> bool;
}

/// A one-shot flag carrying the payload of the first signal.
pub struct OnceSignal<P> {
    value: OnceLock<P>,
    notify: Notify,
}

impl<P> OnceSignal<P> {
    /// An unsignaled flag.
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    /// Record `payload` if nothing was recorded yet.
    ///
    /// Returns `true` only for the call that won.
    pub fn signal(&self, payload: P) -> bool {
        let won = self.value.set(payload).is_ok();
        if won {
            self.notify.notify_waiters();
        }
        won
    }

    /// The recorded payload, if signaled.
    pub fn payload(&self) -> Option<&P> {
        self.value.get()
    }

    /// Wait until signaled.
    pub async fn wait(&self) -> &P {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(value) = self.value.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<P> Default for OnceSignal<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Signaled for OnceSignal<P> {
    fn is_signaled(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<P: fmt::Debug> fmt::Debug for OnceSignal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceSignal")
            .field("payload", &self.value.get())
            .finish()
    }
}

/// `true` when every signal has fired (vacuously true for none).
pub fn all_signaled(signals: &[&dyn Signaled]) -> bool {
    signals.iter().all(|signal| signal.is_signaled())
}

/// `true` when at least one signal has not fired yet.
pub fn any_unsignaled(signals: &[&dyn Signaled]) -> bool {
    !all_signaled(signals)
}
