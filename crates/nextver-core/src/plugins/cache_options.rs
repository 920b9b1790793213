use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::events::{CACHE_OPTIONS_READY, CONFIGURATION_READY};
use crate::cache::{VersionCacheOptions, validate_cache_id};
use crate::events::Signal;
use crate::plugin::{Lifecycle, Plugin, PluginResult};

/// Per-run overrides of the `[cache]` configuration, typically from the
/// command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOverrides {
    /// Replaces the configured cache id.
    pub cache_id: Option<String>,
    /// Replaces the configured lock timeout.
    pub lock_timeout: Option<Duration>,
    /// `Some(false)` turns caching off for this run.
    pub enabled: Option<bool>,
}

impl CacheOverrides {
    /// Apply the overrides on top of `options`.
    pub fn apply(&self, mut options: VersionCacheOptions) -> VersionCacheOptions {
        if let Some(cache_id) = &self.cache_id {
            options.cache_id.clone_from(cache_id);
        }
        if let Some(lock_timeout) = self.lock_timeout {
            options.lock_timeout = lock_timeout;
        }
        if let Some(enabled) = self.enabled {
            options.enabled = enabled;
        }
        options
    }
}

/// Derives the cache options of this run and publishes them as
/// `CacheOptionsReady`.
pub struct VersionCacheOptionsPlugin {
    lifecycle: Lifecycle,
    overrides: CacheOverrides,
}

impl VersionCacheOptionsPlugin {
    /// A plugin applying `overrides` to the configured options.
    pub fn new(overrides: CacheOverrides) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new("cache-options"),
            overrides,
        })
    }
}

#[async_trait]
impl Plugin for VersionCacheOptionsPlugin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        let bus = self.lifecycle.events()?.clone();
        let overrides = self.overrides.clone();
        let subscription = self.lifecycle.events()?.subscribe(
            Signal::once(&CONFIGURATION_READY),
            move |configured| {
                let bus = bus.clone();
                let options = overrides.apply(configured.config.cache_options());
                async move {
                    validate_cache_id(&options.cache_id)?;
                    debug!(?options, "cache options ready");
                    bus.emit(&CACHE_OPTIONS_READY, options).await
                }
            },
        );
        self.lifecycle.add_disposable(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Config};
    use crate::events::EventBus;
    use crate::plugin::{PluginError, execute_plugin};
    use crate::plugins::ConfiguredConfiguration;

    fn configured(config: Config) -> ConfiguredConfiguration {
        ConfiguredConfiguration {
            config: Arc::new(config),
            sources: Arc::from(Vec::new()),
            working_dir: "/repo".into(),
        }
    }

    async fn options_for(config: Config, overrides: CacheOverrides) -> PluginResult<VersionCacheOptions> {
        let bus = EventBus::new();
        let ready = bus.signal_once(Signal::once(&CACHE_OPTIONS_READY));
        execute_plugin(VersionCacheOptionsPlugin::new(overrides), &bus).await?;
        bus.emit(&CONFIGURATION_READY, configured(config)).await?;
        Ok(ready.payload().cloned().unwrap())
    }

    #[tokio::test]
    async fn configuration_is_used_without_overrides() {
        let config = Config {
            cache: Some(CacheConfig {
                cache_id: Some("ci".into()),
                lock_timeout_ms: Some(100),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = options_for(config, CacheOverrides::default()).await.unwrap();
        assert_eq!(options.cache_id, "ci");
        assert_eq!(options.lock_timeout, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn overrides_win_over_configuration() {
        let config = Config {
            cache: Some(CacheConfig {
                cache_id: Some("ci".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overrides = CacheOverrides {
            cache_id: Some("X".into()),
            lock_timeout: Some(Duration::from_secs(1)),
            enabled: Some(false),
        };
        let options = options_for(config, overrides).await.unwrap();
        assert_eq!(options.cache_id, "X");
        assert_eq!(options.lock_timeout, Duration::from_secs(1));
        assert!(!options.enabled);
    }

    #[tokio::test]
    async fn invalid_cache_id_fails() {
        let overrides = CacheOverrides {
            cache_id: Some("../up".into()),
            ..Default::default()
        };
        let err = options_for(Config::default(), overrides).await.unwrap_err();
        assert!(matches!(err, PluginError::Cache(_)));
    }
}
