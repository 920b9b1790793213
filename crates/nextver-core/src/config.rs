//! Configuration loading and discovery.
//!
//! This module provides configuration file discovery by:
//! 1. Walking up from the current directory to find project config
//! 2. Loading user config from XDG config directory
//! 3. Merging with sensible defaults
//!
//! Besides the merged [`Config`], the loader reports which files took part
//! ([`LoadedConfig::sources`]). Their bytes feed the version cache
//! fingerprint, so editing any of them invalidates the cache.
//!
//! # Supported formats
//!
//! The following configuration file formats are supported:
//! - TOML (`.toml`)
//! - YAML (`.yaml`, `.yml`)
//! - JSON (`.json`)
//!
//! # Config file locations (in order of precedence, highest first):
//! - `.nextver.<ext>` in current directory or any parent
//! - `nextver.<ext>` in current directory or any parent
//! - `~/.config/nextver/config.<ext>` (user config)
//!
//! Where `<ext>` is one of: `toml`, `yaml`, `yml`, `json`
//!
//! # Example
//! ```no_run
//! use camino::Utf8PathBuf;
//! use nextver_core::config::{Config, ConfigLoader};
//!
//! let cwd = std::env::current_dir().unwrap();
//! let cwd = Utf8PathBuf::try_from(cwd).expect("current directory is not valid UTF-8");
//! let loaded = ConfigLoader::new()
//!     .with_project_search(&cwd)
//!     .load_with_sources()
//!     .unwrap();
//! println!("{} config files", loaded.sources.len());
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_CACHE_ID, DEFAULT_LOCK_TIMEOUT, VersionCacheOptions};
use crate::error::{ConfigError, ConfigResult};

/// Tag prefix used when none is configured.
pub const DEFAULT_TAG_PREFIX: &str = "v";

/// Version reported for a repository without any version tag.
pub const DEFAULT_INITIAL_VERSION: Version = Version::new(0, 1, 0);

/// The configuration for nextver.
///
/// Deserialized from config files found during discovery (TOML, YAML, or JSON).
/// All section fields are optional; unset values fall back to the defaults
/// exposed by the accessor methods.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// Version cache settings.
    pub cache: Option<CacheConfig>,
    /// How versions are read from tags.
    pub version: Option<VersionConfig>,
}

/// Version cache settings.
///
/// ```toml
/// [cache]
/// cache_id = "ci"
/// lock_timeout_ms = 5000
/// retention_secs = 86400
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Partition of the cache (default: `"default"`).
    pub cache_id: Option<String>,
    /// How long to wait for a cache file lock (default: 10 seconds).
    pub lock_timeout_ms: Option<u64>,
    /// Cached versions older than this are recomputed (default: kept forever).
    pub retention_secs: Option<u64>,
    /// Where the cache records live (default: `<git dir>/nextver`).
    pub directory: Option<Utf8PathBuf>,
    /// Set to `false` to always recompute.
    pub enabled: Option<bool>,
}

/// How versions are read from tags.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VersionConfig {
    /// Prefix in front of the semver part of a release tag (default: `"v"`).
    pub tag_prefix: Option<String>,
    /// Version to report when no release tag exists yet (default: `0.1.0`).
    pub initial_version: Option<Version>,
}

impl Config {
    /// The configured tag prefix, or [`DEFAULT_TAG_PREFIX`].
    pub fn tag_prefix(&self) -> &str {
        self.version
            .as_ref()
            .and_then(|version| version.tag_prefix.as_deref())
            .unwrap_or(DEFAULT_TAG_PREFIX)
    }

    /// The configured initial version, or [`DEFAULT_INITIAL_VERSION`].
    pub fn initial_version(&self) -> Version {
        self.version
            .as_ref()
            .and_then(|version| version.initial_version.clone())
            .unwrap_or(DEFAULT_INITIAL_VERSION)
    }

    /// Cache options from the `[cache]` section, defaults elsewhere.
    pub fn cache_options(&self) -> VersionCacheOptions {
        let section = self.cache.clone().unwrap_or_default();
        VersionCacheOptions {
            cache_id: section
                .cache_id
                .unwrap_or_else(|| DEFAULT_CACHE_ID.to_string()),
            lock_timeout: section
                .lock_timeout_ms
                .map_or(DEFAULT_LOCK_TIMEOUT, Duration::from_millis),
            retention: section.retention_secs.map(Duration::from_secs),
            directory: section.directory,
            enabled: section.enabled.unwrap_or(true),
        }
    }
}

/// A merged configuration together with the files it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: Config,
    /// Contributing files, lowest precedence first.
    pub sources: Vec<Utf8PathBuf>,
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for XDG directory lookup and config file names.
const APP_NAME: &str = "nextver";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Starting directory for project config search.
    project_search_root: Option<Utf8PathBuf>,
    /// Whether to include user config from XDG directory.
    include_user_config: bool,
    /// Stop searching when we hit a directory containing this file/dir.
    boundary_marker: Option<String>,
    /// Explicit config files to load (for testing or programmatic use).
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default settings.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Set the starting directory for project config search.
    ///
    /// The loader will walk up from this directory looking for config files.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set whether to include user config from `~/.config/nextver/`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Set a boundary marker to stop directory traversal.
    ///
    /// When walking up directories, stop if we find a directory containing
    /// this file or directory name. Default is `.git`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Disable boundary marker (search all the way to filesystem root).
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file to load.
    ///
    /// Files are loaded in order, with later files taking precedence.
    /// Explicit files are loaded after discovered files.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    ///
    /// Precedence (highest to lowest):
    /// 1. Explicit files (in order added via `with_file`)
    /// 2. Project config (closest to search root)
    /// 3. User config (`~/.config/nextver/config.<ext>`)
    /// 4. Default values
    pub fn load(self) -> ConfigResult<Config> {
        self.load_with_sources().map(|loaded| loaded.config)
    }

    /// Like [`load`](Self::load), also reporting the contributing files.
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load_with_sources(self) -> ConfigResult<LoadedConfig> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let mut sources = Vec::new();

        // Start with user config (lowest precedence of file sources)
        if self.include_user_config
            && let Some(user_config) = self.find_user_config()
        {
            figment = Self::merge_file(figment, &user_config);
            sources.push(user_config);
        }

        // Add project config
        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            figment = Self::merge_file(figment, &project_config);
            sources.push(project_config);
        }

        // Add explicit files (highest precedence)
        for file in &self.explicit_files {
            figment = Self::merge_file(figment, file);
            sources.push(file.clone());
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            sources = sources.len(),
            "configuration loaded"
        );
        Ok(LoadedConfig { config, sources })
    }

    /// Find project config by walking up from the given directory.
    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            // Check for config files in this directory (try each extension)
            for ext in CONFIG_EXTENSIONS {
                // Try dotfile first (.nextver.toml)
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }

                // Then try regular name (nextver.toml)
                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            // The directory holding the marker is the last one searched.
            if let Some(ref marker) = self.boundary_marker
                && dir.join(marker).exists()
            {
                break;
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }

    /// Find user config in XDG config directory.
    fn find_user_config(&self) -> Option<Utf8PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
        let config_dir = proj_dirs.config_dir();

        // Try each supported extension
        for ext in CONFIG_EXTENSIONS {
            let config_path = config_dir.join(format!("config.{ext}"));
            if config_path.is_file() {
                return Utf8PathBuf::from_path_buf(config_path).ok();
            }
        }

        None
    }

    /// Merge a config file into the figment, detecting format from extension.
    fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
        match path.extension() {
            Some("toml") => figment.merge(Toml::file_exact(path.as_str())),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
            Some("json") => figment.merge(Json::file_exact(path.as_str())),
            _ => figment.merge(Toml::file_exact(path.as_str())),
        }
    }
}

/// Find the project config file path without loading it.
///
/// Useful for commands that need to know where config is located.
pub fn find_project_config<P: AsRef<Utf8Path>>(start: P) -> Option<Utf8PathBuf> {
    ConfigLoader::new()
        .with_project_search(start.as_ref())
        .without_boundary_marker()
        .find_project_config(start.as_ref())
}

/// Get the project directories for XDG-compliant path resolution.
///
/// Returns `None` if the home directory cannot be determined.
fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Get the user config directory path.
///
/// Returns `~/.config/nextver/` on Linux, `~/Library/Application Support/nextver/`
/// on macOS, and equivalent on other platforms.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.config_dir().to_path_buf()).ok()
}

/// Get the user cache directory path.
///
/// Returns `~/.cache/nextver/` on Linux, `~/Library/Caches/nextver/`
/// on macOS, and equivalent on other platforms.
pub fn user_cache_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = project_dirs()?;
    Utf8PathBuf::from_path_buf(proj_dirs.cache_dir().to_path_buf()).ok()
}
