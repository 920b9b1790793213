//! The cache plugin: decides whether the previous run's version is still
//! valid for the current inputs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::events::{
    BEFORE_EVERY_RUN, CACHE_OPTIONS_READY, CHECK_VERSION_CACHE_REQUESTED, CHECKED_VERSION_CACHE,
    CONFIGURATION_READY, CONFIGURE_SERVICES, CREATE_VERSION_CACHE_MANAGER,
    ConfiguredConfiguration, REPOSITORY_READY,
};
use crate::cache::{
    CacheDirectory, CacheError, CacheFingerprint, CacheMiss, CacheStatus, CachedVersion, HashCheck,
    RepositoryHeadState, VersionCacheManager, VersionCacheManagerContext, VersionCacheOptions,
    compute_fingerprint,
};
use crate::events::{EventBus, OnceSignal, Signal};
use crate::git::RepositoryHandle;
use crate::plugin::{Lifecycle, Plugin, PluginError, PluginResult};

/// Result of one cache check, carried by `CheckedVersionCache`.
#[derive(Debug, Clone)]
pub struct CacheCheckOutcome {
    /// The cache id that was checked.
    pub cache_id: String,
    /// `None` when caching is disabled.
    pub fingerprint: Option<CacheFingerprint>,
    /// Repository state that went into the fingerprint.
    pub head: Option<RepositoryHeadState>,
    /// The hash record check; `None` when caching is disabled.
    pub hash: Option<HashCheck>,
    /// The cache record check; a miss without reading the record when the
    /// hash record already disagreed.
    pub status: CacheStatus,
    /// Time spent on the whole check.
    pub elapsed: Duration,
    /// The manager used for the check; `None` when caching is disabled.
    pub manager: Option<Arc<VersionCacheManager>>,
}

impl CacheCheckOutcome {
    /// Whether the cached version can be reused.
    pub fn is_up_to_date(&self) -> bool {
        self.status.is_up_to_date()
    }

    /// Why the cached version cannot be reused.
    pub fn reason(&self) -> Option<&CacheMiss> {
        self.status.miss()
    }

    /// The reusable cached version.
    pub fn cached(&self) -> Option<&CachedVersion> {
        self.status.cached()
    }
}

/// Read access to the cache check, for other plugins.
///
/// Every method fails with [`PluginError::NotYetChecked`] until
/// `CheckedVersionCache` has been emitted.
pub trait VersionCacheService: Send + Sync {
    /// The full outcome of the check.
    fn outcome(&self) -> PluginResult<Arc<CacheCheckOutcome>>;

    /// Whether the cached version can be reused.
    fn is_cache_up_to_date(&self) -> PluginResult<bool> {
        Ok(self.outcome()?.is_up_to_date())
    }

    /// The reusable cached version, `None` on a miss.
    fn version_cache(&self) -> PluginResult<Option<CachedVersion>> {
        Ok(self.outcome()?.cached().cloned())
    }

    /// The manager for this run's cache id, `None` when caching is disabled.
    fn manager(&self) -> PluginResult<Option<Arc<VersionCacheManager>>> {
        Ok(self.outcome()?.manager.clone())
    }
}

/// Runs the cache check once the configuration, the repository and the
/// cache options are known and the run asks for it.
pub struct VersionCachePlugin {
    lifecycle: Lifecycle,
    checked: OnceSignal<Arc<CacheCheckOutcome>>,
}

impl VersionCachePlugin {
    /// A plugin that has not checked anything yet.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new("version-cache"),
            checked: OnceSignal::new(),
        })
    }

    #[instrument(skip_all, fields(cache_id = %options.cache_id))]
    async fn check(
        &self,
        bus: &EventBus,
        configured: &ConfiguredConfiguration,
        repository: &RepositoryHandle,
        options: VersionCacheOptions,
    ) -> PluginResult<CacheCheckOutcome> {
        let started = Instant::now();
        if !options.enabled {
            return Ok(CacheCheckOutcome {
                cache_id: options.cache_id,
                fingerprint: None,
                head: None,
                hash: None,
                status: CacheStatus::Stale(CacheMiss::Disabled),
                elapsed: started.elapsed(),
                manager: None,
            });
        }

        let context = Arc::new(VersionCacheManagerContext::new());
        bus.emit(&CREATE_VERSION_CACHE_MANAGER, Arc::clone(&context))
            .await?;
        let directory = CacheDirectory::resolve(&options, repository.git_dir());
        let manager = Arc::new(VersionCacheManager::new(directory, options, context.codec())?);

        let head = repository
            .head_state(configured.config.tag_prefix())
            .map_err(|e| CacheError::FingerprintInput {
                reason: e.to_string(),
            })?;
        let fingerprint = compute_fingerprint(&head, &configured.sources);
        debug!(%fingerprint, "fingerprint computed");

        let hash = manager
            .hash_file()
            .is_up_to_date_otherwise_update(&fingerprint)
            .await?;
        let status = match &hash.reason {
            None => manager.is_cache_up_to_date(&fingerprint).await?,
            Some(reason) => CacheStatus::Stale(reason.clone()),
        };

        Ok(CacheCheckOutcome {
            cache_id: manager.cache_id().to_string(),
            fingerprint: Some(fingerprint),
            head: Some(head),
            hash: Some(hash),
            status,
            elapsed: started.elapsed(),
            manager: Some(manager),
        })
    }
}

impl VersionCacheService for VersionCachePlugin {
    fn outcome(&self) -> PluginResult<Arc<CacheCheckOutcome>> {
        self.checked
            .payload()
            .cloned()
            .ok_or(PluginError::NotYetChecked)
    }
}

#[async_trait]
impl Plugin for VersionCachePlugin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        let bus = self.lifecycle.events()?.clone();

        let requested = Signal::once(&CONFIGURATION_READY)
            .zip(Signal::once(&REPOSITORY_READY))
            .zip(Signal::once(&CACHE_OPTIONS_READY))
            .once_first(&BEFORE_EVERY_RUN)
            .zip(Signal::once(&CHECK_VERSION_CACHE_REQUESTED));
        let plugin = Arc::clone(&self);
        let emitter = bus.clone();
        let check = bus.subscribe(
            requested,
            move |((((configured, repository), options), ()), ())| {
                let plugin = Arc::clone(&plugin);
                let bus = emitter.clone();
                async move {
                    let outcome = Arc::new(
                        plugin
                            .check(&bus, &configured, &repository, options)
                            .await?,
                    );
                    info!(
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        cache_id = %outcome.cache_id,
                        up_to_date = outcome.is_up_to_date(),
                        reason = ?outcome.reason().map(ToString::to_string),
                        "version cache checked"
                    );
                    plugin.checked.signal(Arc::clone(&outcome));
                    bus.emit(&CHECKED_VERSION_CACHE, outcome).await
                }
            },
        );
        self.lifecycle.add_disposable(check)?;

        let publish = bus.subscribe_sync(
            Signal::every(&CONFIGURE_SERVICES).zip(Signal::once(&CHECKED_VERSION_CACHE)),
            |(services, outcome)| {
                if let Some(manager) = &outcome.manager {
                    services.add_singleton(Arc::clone(manager));
                }
                Ok(())
            },
        );
        self.lifecycle.add_disposable(publish)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ConfigurationSource, VersionCache};
    use crate::config::Config;
    use crate::git::testing::StaticRepository;
    use crate::plugin::execute_plugin;
    use crate::plugins::ServiceRegistrar;
    use camino::Utf8PathBuf;
    use semver::Version;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        bus: EventBus,
        plugin: Arc<VersionCachePlugin>,
        repository: RepositoryHandle,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let git_dir = Utf8PathBuf::from_path_buf(dir.path().join(".git")).unwrap();
        let repository: RepositoryHandle = Arc::new(StaticRepository {
            git_dir,
            ..Default::default()
        });
        let bus = EventBus::new();
        let plugin = VersionCachePlugin::new();
        execute_plugin(plugin.clone(), &bus).await.unwrap();
        Harness {
            _dir: dir,
            bus,
            plugin,
            repository,
        }
    }

    fn configured(config: &str) -> ConfiguredConfiguration {
        ConfiguredConfiguration {
            config: Arc::new(Config::default()),
            sources: Arc::from(vec![ConfigurationSource::new("nextver.toml", config)]),
            working_dir: "/repo".into(),
        }
    }

    fn options() -> VersionCacheOptions {
        VersionCacheOptions {
            cache_id: "X".into(),
            lock_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    impl Harness {
        async fn ready(&self, config: &str, options: VersionCacheOptions) {
            self.bus
                .emit(&CONFIGURATION_READY, configured(config))
                .await
                .unwrap();
            self.bus
                .emit(&REPOSITORY_READY, Arc::clone(&self.repository))
                .await
                .unwrap();
            self.bus.emit(&CACHE_OPTIONS_READY, options).await.unwrap();
        }

        async fn request(&self) -> PluginResult<()> {
            self.bus.emit(&BEFORE_EVERY_RUN, ()).await?;
            self.bus.emit(&CHECK_VERSION_CACHE_REQUESTED, ()).await
        }
    }

    #[tokio::test]
    async fn reading_before_check_is_not_yet_checked() {
        let h = harness().await;
        assert!(matches!(h.plugin.outcome(), Err(PluginError::NotYetChecked)));
        assert!(matches!(
            h.plugin.is_cache_up_to_date(),
            Err(PluginError::NotYetChecked)
        ));
        assert!(matches!(
            h.plugin.version_cache(),
            Err(PluginError::NotYetChecked)
        ));
    }

    #[tokio::test]
    async fn check_waits_for_every_precondition() {
        let h = harness().await;
        let checked = h.bus.signal_once(Signal::once(&CHECKED_VERSION_CACHE));

        // Requested before the inputs are ready: the gate is not armed yet.
        h.request().await.unwrap();
        assert!(checked.payload().is_none());

        h.ready("a", options()).await;
        h.request().await.unwrap();
        let outcome = checked.payload().unwrap();
        assert_eq!(outcome.reason(), Some(&CacheMiss::NoPriorHash));
        assert!(h.plugin.outcome().is_ok());
    }

    #[tokio::test]
    async fn extensions_are_collected_before_the_manager_is_built() {
        let h = harness().await;
        let _codec = h.bus.subscribe_sync(
            Signal::once(&CREATE_VERSION_CACHE_MANAGER),
            |context: Arc<VersionCacheManagerContext>| {
                context.register_extension(crate::cache::JsonExtension::<u32>::new("count"))?;
                Ok(())
            },
        );
        h.ready("a", options()).await;
        h.request().await.unwrap();

        let manager = h.plugin.manager().unwrap().unwrap();
        assert_eq!(manager.codec().names().collect::<Vec<_>>(), vec!["count"]);
    }

    #[tokio::test]
    async fn manager_is_published_on_configure_services() {
        let h = harness().await;
        h.ready("a", options()).await;
        h.request().await.unwrap();

        let services = Arc::new(ServiceRegistrar::new());
        h.bus
            .emit(&CONFIGURE_SERVICES, Arc::clone(&services))
            .await
            .unwrap();
        let manager = services.get::<VersionCacheManager>().unwrap();
        assert_eq!(manager.cache_id(), "X");
    }

    #[tokio::test]
    async fn disabled_cache_skips_the_check() {
        let h = harness().await;
        let disabled = VersionCacheOptions {
            enabled: false,
            ..options()
        };
        h.ready("a", disabled).await;
        h.request().await.unwrap();

        let outcome = h.plugin.outcome().unwrap();
        assert_eq!(outcome.reason(), Some(&CacheMiss::Disabled));
        assert!(outcome.fingerprint.is_none());
        assert!(h.plugin.manager().unwrap().is_none());
    }

    #[tokio::test]
    async fn hit_after_write_with_unchanged_inputs() {
        let first = harness().await;
        first.ready("a", options()).await;
        first.request().await.unwrap();
        let outcome = first.plugin.outcome().unwrap();
        let manager = outcome.manager.clone().unwrap();
        let cache = VersionCache {
            version: Version::new(1, 2, 3),
            previous_version: None,
            branch: None,
            commit: None,
        };
        manager
            .write(&outcome.fingerprint.unwrap(), &cache, &Default::default())
            .await
            .unwrap();

        // A second run in the same repository.
        let second = Harness {
            bus: EventBus::new(),
            plugin: VersionCachePlugin::new(),
            ..first
        };
        execute_plugin(second.plugin.clone(), &second.bus)
            .await
            .unwrap();
        second.ready("a", options()).await;
        second.request().await.unwrap();

        assert!(second.plugin.is_cache_up_to_date().unwrap());
        let cached = second.plugin.version_cache().unwrap().unwrap();
        assert_eq!(cached.cache, cache);
    }

    #[tokio::test]
    async fn held_hash_lock_fails_the_check() {
        let h = harness().await;
        let directory = CacheDirectory::resolve(&options(), h.repository.git_dir());
        let _holder = crate::cache::LockedFile::acquire(
            &directory.hash_file("X"),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        h.ready("a", options()).await;
        let err = h.request().await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Cache(CacheError::LockTimeout { .. })
        ));
        assert!(matches!(h.plugin.outcome(), Err(PluginError::NotYetChecked)));
    }
}
