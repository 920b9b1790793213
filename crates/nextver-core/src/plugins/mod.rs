//! The plugins that make up a `nextver` run, and the runner that drives them.
//!
//! Each plugin reacts to the well-known [`events`] and publishes its own.
//! A run emits, in order:
//!
//! 1. [`INITIALIZE`](events::INITIALIZE): providers publish
//!    `ConfigurationReady`, `RepositoryReady` and `CacheOptionsReady`.
//! 2. [`BEFORE_EVERY_RUN`](events::BEFORE_EVERY_RUN)
//! 3. [`CHECK_VERSION_CACHE_REQUESTED`](events::CHECK_VERSION_CACHE_REQUESTED):
//!    the cache plugin fingerprints the inputs and emits `CheckedVersionCache`.
//! 4. [`CONFIGURE_SERVICES`](events::CONFIGURE_SERVICES): plugins publish
//!    shared services such as the cache manager.
//! 5. [`NEXT_VERSION_REQUESTED`](events::NEXT_VERSION_REQUESTED), only when a
//!    version is wanted.

mod cache_options;
mod configuration;
pub mod events;
mod git;
mod next_version;
mod runner;
mod services;
mod version_cache;

pub use cache_options::{CacheOverrides, VersionCacheOptionsPlugin};
pub use configuration::ConfigurationPlugin;
pub use events::ConfiguredConfiguration;
pub use git::GitPlugin;
pub use next_version::{
    COMMIT_SUMMARY_EXTENSION, CommitSummary, NextVersion, NextVersionPlugin, NextVersionService,
};
pub use runner::{RunGoal, RunOutcome, Runner, StandardSetup};
pub use services::ServiceRegistrar;
pub use version_cache::{CacheCheckOutcome, VersionCachePlugin, VersionCacheService};
