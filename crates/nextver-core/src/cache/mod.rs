//! Version cache: fingerprinting, the hash record and the cache record.
//!
//! Two small JSON files live in the cache directory for each cache id:
//!
//! - `<cache id>.hash.json` remembers the fingerprint of the inputs seen by
//!   the last run. It is rewritten whenever it disagrees with the current
//!   inputs, so it heals itself after corruption or interruption.
//! - `<cache id>.cache.json` stores the computed version together with the
//!   fingerprint it was computed for.
//!
//! Both are only read or written while holding an exclusive lock on the file
//! (see [`LockedFile`]). Anything unexpected in either file is a cache miss,
//! never an error; only lock timeouts and I/O failures surface as
//! [`CacheError`].

mod error;
mod extensions;
mod fingerprint;
mod hash_file;
mod lock;
mod store;

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

pub use error::{CacheError, CacheResult};
pub use extensions::{
    CompositeCodec, ExtensionCodec, ExtensionPayloads, JsonExtension, VersionCacheManagerContext,
};
pub use fingerprint::{
    CacheFingerprint, ConfigurationSource, RepositoryHeadState, compute_fingerprint,
};
pub use hash_file::{HASH_RECORD_FORMAT, HashCheck, VersionHashFile};
pub use lock::{LOCK_POLL_INTERVAL, LockedFile};
pub use store::{CACHE_SCHEMA_VERSION, CacheStatus, CachedVersion, VersionCache, VersionCacheManager};

/// Default cache id when none is configured.
pub const DEFAULT_CACHE_ID: &str = "default";

/// Default bound on waiting for a cache file lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the cache directory inside the repository's git directory.
pub const CACHE_DIR_NAME: &str = "nextver";

/// Why a cache check did not produce a reusable version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CacheMiss {
    /// The hash record was absent or empty.
    NoPriorHash,
    /// The recorded fingerprint differs from the current one.
    FingerprintMismatch,
    /// The hash record was written in an unknown format.
    HashFormatMismatch {
        /// Format found in the record.
        found: u32,
        /// Format this build writes.
        supported: u32,
    },
    /// The hash record could not be parsed.
    UnreadableHashRecord {
        /// The parse error.
        reason: String,
    },
    /// The cache record was absent or empty.
    NoCacheRecord,
    /// The cache record belongs to another cache id.
    CacheIdMismatch {
        /// The cache id being checked.
        expected: String,
        /// The cache id stored in the record.
        found: String,
    },
    /// The cache record was written with an unknown schema.
    SchemaVersionMismatch {
        /// Schema found in the record.
        found: u32,
        /// Schema this build writes.
        supported: u32,
    },
    /// The cache record (or one of its extensions) could not be decoded.
    DecodeFailure {
        /// What could not be decoded.
        reason: String,
    },
    /// The cache record is older than the configured retention.
    Expired {
        /// Age of the record in seconds.
        age_secs: u64,
    },
    /// Caching is turned off for this run.
    Disabled,
}

impl fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPriorHash => f.write_str("no prior hash"),
            Self::FingerprintMismatch => f.write_str("fingerprint mismatch"),
            Self::HashFormatMismatch { found, supported } => {
                write!(f, "hash format mismatch (found {found}, supported {supported})")
            }
            Self::UnreadableHashRecord { reason } => write!(f, "unreadable hash record: {reason}"),
            Self::NoCacheRecord => f.write_str("no cache record"),
            Self::CacheIdMismatch { expected, found } => {
                write!(f, "cache id mismatch (expected {expected}, found {found})")
            }
            Self::SchemaVersionMismatch { found, supported } => {
                write!(f, "schema version mismatch (found {found}, supported {supported})")
            }
            Self::DecodeFailure { reason } => write!(f, "payload decode failure: {reason}"),
            Self::Expired { age_secs } => write!(f, "cache expired ({age_secs}s old)"),
            Self::Disabled => f.write_str("cache disabled"),
        }
    }
}

/// Settings for one cache id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCacheOptions {
    /// Partition of the cache; also the stem of the record file names.
    pub cache_id: String,
    /// How long to wait for a record's lock before giving up.
    pub lock_timeout: Duration,
    /// Records older than this are treated as expired. `None` keeps them.
    pub retention: Option<Duration>,
    /// Overrides the default `<git dir>/nextver` location.
    pub directory: Option<Utf8PathBuf>,
    /// When false, every check is a [`CacheMiss::Disabled`] miss.
    pub enabled: bool,
}

impl Default for VersionCacheOptions {
    fn default() -> Self {
        Self {
            cache_id: DEFAULT_CACHE_ID.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retention: None,
            directory: None,
            enabled: true,
        }
    }
}

/// Reject cache ids that cannot be used as a plain file name.
pub fn validate_cache_id(cache_id: &str) -> CacheResult<()> {
    let valid = !cache_id.is_empty()
        && !cache_id.starts_with('.')
        && cache_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidCacheId {
            cache_id: cache_id.to_string(),
        })
    }
}

/// Where the records of every cache id are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirectory {
    root: Utf8PathBuf,
}

impl CacheDirectory {
    /// Keep records under `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default location inside a repository's git directory.
    pub fn for_git_dir(git_dir: &Utf8Path) -> Self {
        Self::new(git_dir.join(CACHE_DIR_NAME))
    }

    /// Explicit directory if configured, otherwise the git directory default.
    pub fn resolve(options: &VersionCacheOptions, git_dir: &Utf8Path) -> Self {
        match &options.directory {
            Some(directory) => Self::new(directory.clone()),
            None => Self::for_git_dir(git_dir),
        }
    }

    /// The directory itself.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the hash record for `cache_id`.
    pub fn hash_file(&self, cache_id: &str) -> Utf8PathBuf {
        self.root.join(format!("{cache_id}.hash.json"))
    }

    /// Path of the cache record for `cache_id`.
    pub fn cache_file(&self, cache_id: &str) -> Utf8PathBuf {
        self.root.join(format!("{cache_id}.cache.json"))
    }
}
