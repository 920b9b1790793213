use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use tracing::debug;

use super::events::{CONFIGURATION_READY, ConfiguredConfiguration, INITIALIZE};
use crate::cache::ConfigurationSource;
use crate::config::LoadedConfig;
use crate::events::Signal;
use crate::plugin::{Lifecycle, Plugin, PluginResult};

/// Publishes the loaded configuration as `ConfigurationReady`.
///
/// Source files are read when the run initializes, so the fingerprint sees
/// their content as of this run.
pub struct ConfigurationPlugin {
    lifecycle: Lifecycle,
    loaded: LoadedConfig,
    working_dir: Utf8PathBuf,
}

impl ConfigurationPlugin {
    /// Publish `loaded` for a run started in `working_dir`.
    pub fn new(loaded: LoadedConfig, working_dir: impl Into<Utf8PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new("configuration"),
            loaded,
            working_dir: working_dir.into(),
        })
    }

    fn configured(&self) -> PluginResult<ConfiguredConfiguration> {
        let sources = self
            .loaded
            .sources
            .iter()
            .map(|path| ConfigurationSource::read(path))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(sources = sources.len(), "configuration sources read");
        Ok(ConfiguredConfiguration {
            config: Arc::new(self.loaded.config.clone()),
            sources: sources.into(),
            working_dir: self.working_dir.clone(),
        })
    }
}

#[async_trait]
impl Plugin for ConfigurationPlugin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        let bus = self.lifecycle.events()?.clone();
        let plugin = Arc::clone(&self);
        let subscription = self
            .lifecycle
            .events()?
            .subscribe(Signal::once(&INITIALIZE), move |()| {
                let bus = bus.clone();
                let configured = plugin.configured();
                async move { bus.emit(&CONFIGURATION_READY, configured?).await }
            });
        self.lifecycle.add_disposable(subscription)
    }
}
