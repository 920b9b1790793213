use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::sync::lock;

/// A resource with explicit teardown.
///
/// Implementations must tolerate being disposed more than once.
#[async_trait]
pub trait Disposable: Send + Sync {
    /// Release the resource.
    fn dispose(&self);

    /// Suspending teardown. Defaults to [`Disposable::dispose`].
    async fn dispose_async(&self) {
        self.dispose();
    }
}

type Action = Box<dyn FnOnce() + Send>;

/// A [`Disposable`] that runs a closure on first disposal.
pub struct DisposeFn {
    action: Mutex<Option<Action>>,
}

impl DisposeFn {
    /// Wrap `action`; it runs on the first disposal only.
    pub fn new<F: FnOnce() + Send + 'static>(action: F) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }
}

impl fmt::Debug for DisposeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposeFn")
            .field("pending", &lock(&self.action).is_some())
            .finish()
    }
}

impl Disposable for DisposeFn {
    fn dispose(&self) {
        let action = lock(&self.action).take();
        if let Some(action) = action {
            action();
        }
    }
}

#[async_trait]
impl<D: Disposable + ?Sized> Disposable for std::sync::Arc<D> {
    fn dispose(&self) {
        (**self).dispose();
    }

    async fn dispose_async(&self) {
        (**self).dispose_async().await;
    }
}
