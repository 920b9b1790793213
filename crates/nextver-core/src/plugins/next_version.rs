//! The plugin that answers "what is the next version?", from the cache when
//! it can.

use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::events::{
    CONFIGURATION_READY, CONFIGURE_SERVICES, CREATE_VERSION_CACHE_MANAGER, ConfiguredConfiguration,
    NEXT_VERSION_COMPUTED, NEXT_VERSION_REQUESTED, REPOSITORY_READY,
};
use super::{CacheCheckOutcome, ServiceRegistrar, VersionCacheService};
use crate::cache::{
    CacheMiss, ExtensionPayloads, JsonExtension, VersionCache, VersionCacheManager,
    VersionCacheManagerContext,
};
use crate::events::{EventBus, OnceSignal, Signal};
use crate::git::RepositoryHandle;
use crate::plugin::{LazyPlugin, Lifecycle, Plugin, PluginError, PluginRegistry, PluginResult};
use crate::version::{BumpLevel, compute_next_version, parse_tag};

/// Name of the cache extension holding a [`CommitSummary`].
pub const COMMIT_SUMMARY_EXTENSION: &str = "commit-summary";

/// How the cached version was derived; stored next to it in the cache
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Tag the commits were counted from.
    pub previous_tag: Option<String>,
    /// Commits since that tag.
    pub commit_count: usize,
    /// Bump applied to the tagged version; `None` when nothing changed.
    pub bump: Option<BumpLevel>,
}

/// The answer of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextVersion {
    /// The next version.
    pub version: Version,
    /// The latest released version, if any.
    pub previous_version: Option<Version>,
    /// Whether the version came from the cache.
    pub cached: bool,
    /// Why the cache could not be used; `None` on a hit.
    pub reason: Option<CacheMiss>,
    /// Cache id of the run.
    pub cache_id: String,
    /// Commit summary, when known. Records written without the extension
    /// have none.
    pub summary: Option<CommitSummary>,
}

/// Read access to the computed version, for other plugins.
pub trait NextVersionService: Send + Sync {
    /// Fails with [`PluginError::InvalidState`] until `NextVersionComputed`
    /// has been emitted.
    fn next_version(&self) -> PluginResult<Arc<NextVersion>>;
}

/// Reuses the cached version on a hit, otherwise computes it from tags and
/// conventional commits and writes it back to the cache.
pub struct NextVersionPlugin {
    lifecycle: Lifecycle,
    cache: Arc<LazyPlugin<dyn VersionCacheService>>,
    computed: OnceSignal<Arc<NextVersion>>,
}

impl NextVersionPlugin {
    /// The cache plugin is looked up lazily through `registry`, so it may be
    /// registered before or after this plugin.
    pub fn new(registry: &PluginRegistry) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new("next-version"),
            cache: registry.lazy::<dyn VersionCacheService>(),
            computed: OnceSignal::new(),
        })
    }

    #[instrument(skip_all)]
    async fn resolve(
        &self,
        configured: &ConfiguredConfiguration,
        repository: &RepositoryHandle,
        services: &ServiceRegistrar,
    ) -> PluginResult<NextVersion> {
        let outcome = self.cache.value()?.outcome()?;

        if let Some(hit) = outcome.cached() {
            info!(version = %hit.cache.version, "reusing cached version");
            return Ok(NextVersion {
                version: hit.cache.version.clone(),
                previous_version: hit.cache.previous_version.clone(),
                cached: true,
                reason: None,
                cache_id: outcome.cache_id.clone(),
                summary: hit
                    .extensions
                    .get::<CommitSummary>(COMMIT_SUMMARY_EXTENSION)
                    .cloned(),
            });
        }

        let config = &configured.config;
        let prefix = config.tag_prefix();
        let tag = repository.latest_version_tag(prefix)?;
        let previous_version = tag
            .as_deref()
            .map(|tag| parse_tag(tag, prefix))
            .transpose()?;
        let messages = repository.commit_messages_since(tag.as_deref())?;
        let computation =
            compute_next_version(previous_version.as_ref(), &messages, &config.initial_version())?;
        let summary = CommitSummary {
            previous_tag: tag,
            commit_count: computation.commit_count,
            bump: computation.bump,
        };
        info!(
            version = %computation.version,
            commits = summary.commit_count,
            reason = ?outcome.reason().map(ToString::to_string),
            "computed next version"
        );

        if let Some(manager) = services.get::<VersionCacheManager>() {
            store(&manager, &outcome, &computation.version, previous_version.clone(), &summary)
                .await?;
        }

        Ok(NextVersion {
            version: computation.version,
            previous_version,
            cached: false,
            reason: outcome.reason().cloned(),
            cache_id: outcome.cache_id.clone(),
            summary: Some(summary),
        })
    }
}

async fn store(
    manager: &VersionCacheManager,
    outcome: &CacheCheckOutcome,
    version: &Version,
    previous_version: Option<Version>,
    summary: &CommitSummary,
) -> PluginResult<()> {
    let Some(fingerprint) = outcome.fingerprint else {
        return Ok(());
    };
    let head = outcome.head.clone().unwrap_or_default();
    let cache = VersionCache {
        version: version.clone(),
        previous_version,
        branch: head.head_ref,
        commit: head.head_commit,
    };
    let mut extensions = ExtensionPayloads::new();
    extensions.insert(COMMIT_SUMMARY_EXTENSION, summary.clone());
    manager.write(&fingerprint, &cache, &extensions).await?;
    Ok(())
}

impl NextVersionService for NextVersionPlugin {
    fn next_version(&self) -> PluginResult<Arc<NextVersion>> {
        self.computed.payload().cloned().ok_or_else(|| {
            PluginError::InvalidState("the next version has not been computed".to_string())
        })
    }
}

#[async_trait]
impl Plugin for NextVersionPlugin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        let bus: EventBus = self.lifecycle.events()?.clone();

        let extension = bus.subscribe_sync(
            Signal::once(&CREATE_VERSION_CACHE_MANAGER),
            |context: Arc<VersionCacheManagerContext>| {
                context.register_extension(JsonExtension::<CommitSummary>::new(
                    COMMIT_SUMMARY_EXTENSION,
                ))?;
                Ok(())
            },
        );
        self.lifecycle.add_disposable(extension)?;

        let requested = Signal::once(&CONFIGURATION_READY)
            .zip(Signal::once(&REPOSITORY_READY))
            .zip(Signal::once(&CONFIGURE_SERVICES))
            .once_first(&NEXT_VERSION_REQUESTED);
        let plugin = Arc::clone(&self);
        let emitter = bus.clone();
        let compute = bus.subscribe(
            requested,
            move |(((configured, repository), services), ())| {
                let plugin = Arc::clone(&plugin);
                let bus = emitter.clone();
                async move {
                    let next = Arc::new(
                        plugin
                            .resolve(&configured, &repository, &services)
                            .await?,
                    );
                    plugin.computed.signal(Arc::clone(&next));
                    bus.emit(&NEXT_VERSION_COMPUTED, next).await
                }
            },
        );
        self.lifecycle.add_disposable(compute)
    }
}
