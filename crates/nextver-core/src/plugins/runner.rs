//! Composition root: owns the bus, the registry and the services of one run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use tracing::{debug, instrument};

use super::events::{
    BEFORE_EVERY_RUN, CHECK_VERSION_CACHE_REQUESTED, CHECKED_VERSION_CACHE, CONFIGURE_SERVICES,
    INITIALIZE, NEXT_VERSION_COMPUTED, NEXT_VERSION_REQUESTED,
};
use super::{
    CacheCheckOutcome, CacheOverrides, ConfigurationPlugin, GitPlugin, NextVersion,
    NextVersionPlugin, NextVersionService, ServiceRegistrar, VersionCacheOptionsPlugin,
    VersionCachePlugin, VersionCacheService,
};
use crate::config::LoadedConfig;
use crate::events::{EventBus, Signal, Signaled, any_unsignaled};
use crate::git::RepositoryHandle;
use crate::plugin::{Plugin, PluginError, PluginRegistry, PluginResult, execute_plugin};

/// How far a run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunGoal {
    /// Stop after the cache check.
    CheckCache,
    /// Also produce the next version.
    NextVersion,
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The cache check of the run.
    pub cache: Arc<CacheCheckOutcome>,
    /// Set for [`RunGoal::NextVersion`].
    pub next_version: Option<Arc<NextVersion>>,
}

/// Inputs of the standard plugin set.
#[derive(Debug, Clone, Default)]
pub struct StandardSetup {
    /// Configuration and its source files.
    pub loaded: LoadedConfig,
    /// Where to discover the repository from.
    pub working_dir: Utf8PathBuf,
    /// Per-run cache overrides.
    pub overrides: CacheOverrides,
    /// Use this repository instead of discovering one from `working_dir`.
    pub repository: Option<RepositoryHandle>,
}

/// Drives one run: executes the registered plugins, then emits the run's
/// events in order.
#[derive(Debug, Default)]
pub struct Runner {
    bus: EventBus,
    registry: PluginRegistry,
    services: Arc<ServiceRegistrar>,
    started: AtomicBool,
}

impl Runner {
    /// A runner without plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner with the configuration, git, cache options, cache and
    /// next-version plugins.
    pub fn standard(setup: StandardSetup) -> PluginResult<Self> {
        let runner = Self::new();

        let configuration = ConfigurationPlugin::new(setup.loaded, setup.working_dir);
        runner.register::<ConfigurationPlugin>(configuration.clone(), configuration)?;

        let git = match setup.repository {
            Some(repository) => GitPlugin::with_repository(repository),
            None => GitPlugin::new(),
        };
        runner.register::<GitPlugin>(git.clone(), git)?;

        let options = VersionCacheOptionsPlugin::new(setup.overrides);
        runner.register::<VersionCacheOptionsPlugin>(options.clone(), options)?;

        // Created first so its handle to the cache resolves on registration.
        let next_version = NextVersionPlugin::new(&runner.registry);

        let cache = VersionCachePlugin::new();
        runner.register::<dyn VersionCacheService>(cache.clone(), cache)?;
        runner.register::<dyn NextVersionService>(next_version.clone(), next_version)?;

        Ok(runner)
    }

    /// The bus every plugin is executed with.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The registered plugins.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Services published during `ConfigureServices`.
    pub fn services(&self) -> &Arc<ServiceRegistrar> {
        &self.services
    }

    /// Register `plugin` as the provider of capability `C`. Plugins execute
    /// in registration order.
    pub fn register<C>(&self, capability: Arc<C>, plugin: Arc<dyn Plugin>) -> PluginResult<()>
    where
        C: ?Sized + Send + Sync + 'static,
    {
        self.registry.register(capability, plugin)
    }

    /// Execute every plugin and emit the run's events.
    ///
    /// A runner drives a single run; calling this again is an invalid-state
    /// error.
    #[instrument(skip(self), fields(plugins = self.registry.len()))]
    pub async fn run(&self, goal: RunGoal) -> PluginResult<RunOutcome> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PluginError::InvalidState(
                "this runner has already been run".to_string(),
            ));
        }

        let checked = self.bus.signal_once(Signal::once(&CHECKED_VERSION_CACHE));
        let computed = self.bus.signal_once(Signal::once(&NEXT_VERSION_COMPUTED));

        for plugin in self.registry.plugins() {
            execute_plugin(plugin, &self.bus).await?;
        }

        self.bus.emit(&INITIALIZE, ()).await?;
        self.bus.emit(&BEFORE_EVERY_RUN, ()).await?;
        self.bus.emit(&CHECK_VERSION_CACHE_REQUESTED, ()).await?;
        self.bus
            .emit(&CONFIGURE_SERVICES, Arc::clone(&self.services))
            .await?;
        if goal == RunGoal::NextVersion {
            self.bus.emit(&NEXT_VERSION_REQUESTED, ()).await?;
        }

        let mut expected: Vec<&dyn Signaled> = Vec::new();
        expected.push(&*checked);
        if goal == RunGoal::NextVersion {
            expected.push(&*computed);
        }
        if any_unsignaled(&expected) {
            return Err(incomplete());
        }

        let cache = checked.payload().cloned().ok_or_else(incomplete)?;
        let next_version = computed.payload().cloned();
        debug!(up_to_date = cache.is_up_to_date(), "run complete");
        Ok(RunOutcome {
            cache,
            next_version,
        })
    }

    /// Dispose every plugin, last registered first.
    pub async fn shutdown(&self) {
        for plugin in self.registry.plugins().into_iter().rev() {
            plugin.dispose_async().await;
        }
    }
}

fn incomplete() -> PluginError {
    PluginError::InvalidState(
        "the run finished without producing its results; is a required plugin missing?"
            .to_string(),
    )
}
