use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    CacheDirectory, CacheError, CacheFingerprint, CacheMiss, CacheResult, LockedFile,
    VersionCacheOptions,
};

/// Format of the hash record this build reads and writes.
pub const HASH_RECORD_FORMAT: u32 = 1;

#[derive(Serialize)]
struct HashRecord<'a> {
    format: u32,
    cache_id: &'a str,
    fingerprint: String,
}

/// Read side of [`HashRecord`], tolerant of missing fields so that a record
/// from another format still yields a precise miss reason.
#[derive(Deserialize)]
struct StoredHashRecord {
    format: u32,
    #[serde(default)]
    cache_id: Option<String>,
    #[serde(default)]
    fingerprint: Option<String>,
}

/// Outcome of [`VersionHashFile::is_up_to_date_otherwise_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashCheck {
    /// Whether the stored fingerprint matched.
    pub is_up_to_date: bool,
    /// Set exactly when `is_up_to_date` is false.
    pub reason: Option<CacheMiss>,
}

/// The persisted fingerprint of the inputs seen by the last run.
#[derive(Debug, Clone)]
pub struct VersionHashFile {
    path: Utf8PathBuf,
    cache_id: String,
    lock_timeout: Duration,
}

impl VersionHashFile {
    /// The hash record of `options.cache_id` inside `directory`.
    pub fn new(directory: &CacheDirectory, options: &VersionCacheOptions) -> Self {
        Self {
            path: directory.hash_file(&options.cache_id),
            cache_id: options.cache_id.clone(),
            lock_timeout: options.lock_timeout,
        }
    }

    /// Location of the record.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Compare the stored fingerprint with `current` under the file lock.
    ///
    /// Whenever they differ (including an absent or unreadable record) the
    /// record is rewritten with `current` before the lock is released, so an
    /// immediate second call reports up to date.
    #[instrument(skip_all, fields(cache_id = %self.cache_id))]
    pub async fn is_up_to_date_otherwise_update(
        &self,
        current: &CacheFingerprint,
    ) -> CacheResult<HashCheck> {
        let mut file = LockedFile::acquire(&self.path, self.lock_timeout).await?;
        let bytes = file.read_all()?;

        let reason = self.evaluate(&bytes, current);
        if let Some(reason) = &reason {
            debug!(%reason, "hash record stale, rewriting");
            let record = HashRecord {
                format: HASH_RECORD_FORMAT,
                cache_id: &self.cache_id,
                fingerprint: current.to_hex(),
            };
            let json = serde_json::to_vec_pretty(&record).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
            file.rewrite(&json)?;
        }

        Ok(HashCheck {
            is_up_to_date: reason.is_none(),
            reason,
        })
    }

    fn evaluate(&self, bytes: &[u8], current: &CacheFingerprint) -> Option<CacheMiss> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Some(CacheMiss::NoPriorHash);
        }
        let stored: StoredHashRecord = match serde_json::from_slice(bytes) {
            Ok(stored) => stored,
            Err(e) => {
                return Some(CacheMiss::UnreadableHashRecord {
                    reason: e.to_string(),
                });
            }
        };
        if stored.format != HASH_RECORD_FORMAT {
            return Some(CacheMiss::HashFormatMismatch {
                found: stored.format,
                supported: HASH_RECORD_FORMAT,
            });
        }
        if stored.cache_id.as_deref() != Some(self.cache_id.as_str()) {
            return Some(CacheMiss::CacheIdMismatch {
                expected: self.cache_id.clone(),
                found: stored.cache_id.unwrap_or_default(),
            });
        }
        let matches = stored
            .fingerprint
            .as_deref()
            .and_then(CacheFingerprint::from_hex)
            .is_some_and(|stored| stored == *current);
        if matches {
            None
        } else {
            Some(CacheMiss::FingerprintMismatch)
        }
    }
}
