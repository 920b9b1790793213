//! Well-known events of a run.

use std::sync::{Arc, LazyLock};

use camino::Utf8PathBuf;

use super::{CacheCheckOutcome, NextVersion, ServiceRegistrar};
use crate::cache::{ConfigurationSource, VersionCacheManagerContext, VersionCacheOptions};
use crate::config::Config;
use crate::events::Event;
use crate::git::RepositoryHandle;

/// Loaded configuration together with the raw bytes of every file it came
/// from.
#[derive(Debug, Clone)]
pub struct ConfiguredConfiguration {
    /// The merged configuration.
    pub config: Arc<Config>,
    /// Fingerprint input; lowest precedence first.
    pub sources: Arc<[ConfigurationSource]>,
    /// Directory the run was started from.
    pub working_dir: Utf8PathBuf,
}

/// Emitted once by the runner after every plugin has executed.
pub static INITIALIZE: LazyLock<Event<()>> = LazyLock::new(|| Event::new("Initialize"));

/// The configuration and its source bytes are loaded.
pub static CONFIGURATION_READY: LazyLock<Event<ConfiguredConfiguration>> =
    LazyLock::new(|| Event::new("ConfigurationReady"));

/// The repository has been opened.
pub static REPOSITORY_READY: LazyLock<Event<RepositoryHandle>> =
    LazyLock::new(|| Event::new("RepositoryReady"));

/// The cache options of this run are known.
pub static CACHE_OPTIONS_READY: LazyLock<Event<VersionCacheOptions>> =
    LazyLock::new(|| Event::new("CacheOptionsReady"));

/// Emitted at the start of every run, after initialization.
pub static BEFORE_EVERY_RUN: LazyLock<Event<()>> = LazyLock::new(|| Event::new("BeforeEveryRun"));

/// The run asks for the cache check.
pub static CHECK_VERSION_CACHE_REQUESTED: LazyLock<Event<()>> =
    LazyLock::new(|| Event::new("CheckVersionCacheRequested"));

/// Plugins register their cache extension codecs on the carried context.
pub static CREATE_VERSION_CACHE_MANAGER: LazyLock<Event<Arc<VersionCacheManagerContext>>> =
    LazyLock::new(|| Event::new("CreateVersionCacheManager"));

/// The cache check finished; carries its outcome.
pub static CHECKED_VERSION_CACHE: LazyLock<Event<Arc<CacheCheckOutcome>>> =
    LazyLock::new(|| Event::new("CheckedVersionCache"));

/// Plugins publish shared services on the carried registrar.
pub static CONFIGURE_SERVICES: LazyLock<Event<Arc<ServiceRegistrar>>> =
    LazyLock::new(|| Event::new("ConfigureServices"));

/// The run asks for the next version.
pub static NEXT_VERSION_REQUESTED: LazyLock<Event<()>> =
    LazyLock::new(|| Event::new("NextVersionRequested"));

/// The next version is known, cached or computed.
pub static NEXT_VERSION_COMPUTED: LazyLock<Event<Arc<NextVersion>>> =
    LazyLock::new(|| Event::new("NextVersionComputed"));
