//! Core library for nextver.
//!
//! This crate decides *when* plugins run and *whether* a previously computed
//! version is still valid. It provides the foundational types used by the
//! `nextver` CLI and any downstream consumers.
//!
//! # Modules
//!
//! - [`events`] - Typed events, derived signals and the event bus
//! - [`plugin`] - Plugin lifecycle, disposal, registry and lazy handles
//! - [`cache`] - Fingerprints, the hash record and the version cache record
//! - [`plugins`] - The plugins of a run and the runner that drives them
//! - [`config`] - Configuration loading and management
//! - [`git`] - Repository access through the `git` executable
//! - [`version`] - Next-version computation from tags and commits
//! - [`error`] - Configuration error types
//!
//! # Quick Start
//!
//! ```no_run
//! use nextver_core::ConfigLoader;
//! use nextver_core::plugins::{RunGoal, Runner, StandardSetup};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let loaded = ConfigLoader::new().load_with_sources()?;
//! let runner = Runner::standard(StandardSetup {
//!     loaded,
//!     working_dir: ".".into(),
//!     ..Default::default()
//! })?;
//! let outcome = runner.run(RunGoal::NextVersion).await?;
//! if let Some(next) = outcome.next_version {
//!     println!("{} (cached: {})", next.version, next.cached);
//! }
//! runner.shutdown().await;
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]

pub mod cache;

pub mod config;

pub mod error;

pub mod events;

pub mod git;

pub mod plugin;

pub mod plugins;

mod sync;

pub mod version;

pub use config::{Config, ConfigLoader, LoadedConfig, LogLevel};

pub use error::{ConfigError, ConfigResult};

pub use plugin::{PluginError, PluginResult};

// Re-export semver so downstream crates don't need a direct dependency.
pub use semver;
