//! Plugin base: lifecycle, disposal and execution.
//!
//! A plugin is wired to an [`EventBus`] exactly once by [`execute_plugin`],
//! subscribes to signals from its execution hooks, and owns the resources it
//! creates until it is disposed.

mod disposable;
mod lazy;
mod registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::CacheError;
use crate::error::ConfigError;
use crate::events::EventBus;
use crate::git::GitError;
use crate::sync::lock;
use crate::version::VersionError;

pub use disposable::{Disposable, DisposeFn};
pub use lazy::LazyPlugin;
pub use registry::{CapabilityId, ConsumerHandle, PluginRegistration, PluginRegistry};

/// Errors raised by plugins and the orchestration around them.
#[derive(Error, Debug)]
pub enum PluginError {
    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid plugin state: {0}")]
    InvalidState(String),

    /// A resource was added after the plugin was torn down.
    #[error("plugin `{plugin}` has been disposed")]
    Disposed {
        /// Name of the disposed plugin.
        plugin: String,
    },

    /// A lazy handle was read before its capability was registered.
    #[error("no plugin registered for `{capability}`")]
    NotRegistered {
        /// Type name of the missing capability.
        capability: &'static str,
    },

    /// A second plugin tried to register an already provided capability.
    #[error("a plugin is already registered for `{capability}`")]
    DuplicateRegistration {
        /// Type name of the capability.
        capability: &'static str,
    },

    /// Cache state was read before the cache check ran.
    #[error("the version cache has not been checked yet")]
    NotYetChecked,

    /// A cache store operation failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A git query failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A version could not be parsed or computed.
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// Result type alias using [`PluginError`].
pub type PluginResult<T> = Result<T, PluginError>;

/// Where a plugin is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Constructed, not yet attached to a bus.
    Created,
    /// Attached to a bus, hooks not yet run.
    Wired,
    /// Execution hooks are running.
    Executing,
    /// Execution hooks completed.
    Active,
    /// Torn down.
    Disposed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Wired => "wired",
            Self::Executing => "executing",
            Self::Active => "active",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Per-plugin bookkeeping embedded in every [`Plugin`] implementation.
pub struct Lifecycle {
    name: &'static str,
    state: Mutex<PluginState>,
    events: OnceLock<EventBus>,
    resources: Mutex<Option<Vec<Box<dyn Disposable>>>>,
    disposed: AtomicBool,
}

impl Lifecycle {
    /// Fresh bookkeeping for a plugin called `name`, in [`PluginState::Created`].
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(PluginState::Created),
            events: OnceLock::new(),
            resources: Mutex::new(Some(Vec::new())),
            disposed: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PluginState {
        *lock(&self.state)
    }

    /// Whether teardown has started.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// The bus this plugin was executed with.
    pub fn events(&self) -> PluginResult<&EventBus> {
        self.events.get().ok_or_else(|| {
            PluginError::InvalidState(format!(
                "plugin `{}` has not been executed, no event bus is attached",
                self.name
            ))
        })
    }

    /// Hand a resource to the plugin; it is released when the plugin is
    /// disposed.
    pub fn add_disposable<D: Disposable + 'static>(&self, resource: D) -> PluginResult<()> {
        let mut resources = lock(&self.resources);
        match resources.as_mut() {
            Some(list) if !self.is_disposed() => {
                list.push(Box::new(resource));
                Ok(())
            }
            _ => Err(PluginError::Disposed {
                plugin: self.name.to_string(),
            }),
        }
    }

    fn wire(&self, bus: &EventBus) -> PluginResult<()> {
        let mut state = lock(&self.state);
        if *state != PluginState::Created {
            return Err(PluginError::InvalidState(format!(
                "plugin `{}` cannot be executed while {}",
                self.name, *state
            )));
        }
        self.events.set(bus.clone()).map_err(|_| {
            PluginError::InvalidState(format!("plugin `{}` is already wired", self.name))
        })?;
        *state = PluginState::Wired;
        Ok(())
    }

    fn advance(&self, next: PluginState) {
        let mut state = lock(&self.state);
        if *state != PluginState::Disposed {
            *state = next;
        }
    }

    /// Win the right to tear down. Only the first caller gets the resources.
    fn begin_dispose(&self) -> Option<Vec<Box<dyn Disposable>>> {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let resources = lock(&self.resources).take().unwrap_or_default();
        *lock(&self.state) = PluginState::Disposed;
        Some(resources)
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A unit of behavior attached to the event bus.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// The plugin's embedded lifecycle.
    fn lifecycle(&self) -> &Lifecycle;

    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        self.lifecycle().name
    }

    /// Synchronous part of execution; typically sets up subscriptions.
    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        Ok(())
    }

    /// Suspending part of execution, run after [`Plugin::on_execution`].
    async fn on_execution_async(self: Arc<Self>) -> PluginResult<()> {
        Ok(())
    }

    /// Plugin-specific teardown, run after owned resources are released.
    fn on_dispose(&self) {}

    /// Suspending teardown; defaults to [`Plugin::on_dispose`].
    async fn on_dispose_async(&self) {
        self.on_dispose();
    }

    /// Release owned resources then run [`Plugin::on_dispose`]. Idempotent.
    fn dispose(&self) {
        if let Some(resources) = self.lifecycle().begin_dispose() {
            for resource in resources {
                resource.dispose();
            }
            self.on_dispose();
            debug!(plugin = self.name(), "disposed");
        }
    }

    /// Suspending variant of [`Plugin::dispose`]. Idempotent, and exclusive
    /// with [`Plugin::dispose`]: whichever runs first does the teardown.
    async fn dispose_async(&self) {
        if let Some(resources) = self.lifecycle().begin_dispose() {
            for resource in resources {
                resource.dispose_async().await;
            }
            self.on_dispose_async().await;
            debug!(plugin = self.name(), "disposed");
        }
    }
}

/// Wire `plugin` to `bus` and run its execution hooks.
#[instrument(skip_all, fields(plugin = plugin.name()))]
pub async fn execute_plugin(plugin: Arc<dyn Plugin>, bus: &EventBus) -> PluginResult<()> {
    plugin.lifecycle().wire(bus)?;
    plugin.lifecycle().advance(PluginState::Executing);
    Arc::clone(&plugin).on_execution()?;
    Arc::clone(&plugin).on_execution_async().await?;
    plugin.lifecycle().advance(PluginState::Active);
    debug!("plugin active");
    Ok(())
}
