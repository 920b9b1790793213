use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

/// Errors that can occur during cache operations.
///
/// Record content problems are never errors; they are reported as a
/// [`CacheMiss`](super::CacheMiss). These variants cover the cases where the
/// cache could not be consulted at all.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Another process held the lock for longer than the configured bound.
    #[error("timed out after {}ms waiting for the lock on {path}", .waited.as_millis())]
    LockTimeout {
        /// The locked file.
        path: Utf8PathBuf,
        /// How long this process waited.
        waited: Duration,
    },

    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// An input to the fingerprint could not be gathered.
    #[error("fingerprint input unavailable: {reason}")]
    FingerprintInput {
        /// What could not be read.
        reason: String,
    },

    /// The cache id cannot be used as a file name.
    #[error("invalid cache id `{cache_id}`: use letters, digits, `-`, `_` or `.`")]
    InvalidCacheId {
        /// The rejected id.
        cache_id: String,
    },

    /// An extension payload has no codec to write it with.
    #[error("no codec registered for cache extension `{name}`")]
    UnknownExtension {
        /// The extension name.
        name: String,
    },

    /// Two codecs were registered under one extension name.
    #[error("a codec is already registered for cache extension `{name}`")]
    DuplicateExtension {
        /// The extension name.
        name: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: &Utf8Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias using [`CacheError`].
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: Utf8PathBuf::from("/repo/.git/nextver/default.cache.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("default.cache.json"));
    }

    #[test]
    fn lock_timeout_display() {
        let err = CacheError::LockTimeout {
            path: Utf8PathBuf::from("x.hash.json"),
            waited: Duration::from_millis(50),
        };
        let msg = err.to_string();
        assert!(msg.contains("50ms"));
        assert!(msg.contains("x.hash.json"));
    }

    #[test]
    fn invalid_cache_id_display() {
        let err = CacheError::InvalidCacheId {
            cache_id: "a/b".to_string(),
        };
        assert!(err.to_string().contains("`a/b`"));
    }
}
