use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    CacheDirectory, CacheError, CacheFingerprint, CacheMiss, CacheResult, CompositeCodec,
    ExtensionPayloads, LockedFile, VersionCacheOptions, VersionHashFile, validate_cache_id,
};

/// Schema of the cache record this build reads and writes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// The primary cached payload: the computed version and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCache {
    /// The computed next version.
    pub version: Version,
    /// The release the next version was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<Version>,
    /// Branch checked out when the version was computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// HEAD commit when the version was computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct VersionCacheRecord {
    schema_version: u32,
    cache_id: String,
    fingerprint: String,
    created_at: u64,
    version: VersionCache,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, serde_json::Value>,
}

/// Just enough of a record to decide whether the rest is worth decoding.
#[derive(Deserialize)]
struct RecordHeader {
    schema_version: u32,
    #[serde(default)]
    cache_id: String,
    #[serde(default)]
    fingerprint: String,
    #[serde(default)]
    created_at: u64,
}

/// A cache record that passed every check.
#[derive(Debug, Clone)]
pub struct CachedVersion {
    /// The primary payload.
    pub cache: VersionCache,
    /// Decoded extension payloads.
    pub extensions: ExtensionPayloads,
    /// When the record was written.
    pub created_at: SystemTime,
}

/// Result of consulting the cache record.
#[derive(Debug, Clone)]
pub enum CacheStatus {
    /// The record can be reused.
    UpToDate(Box<CachedVersion>),
    /// The record cannot be reused, for the given reason.
    Stale(CacheMiss),
}

impl CacheStatus {
    /// Whether the record can be reused.
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::UpToDate(_))
    }

    /// The reusable record, on a hit.
    pub fn cached(&self) -> Option<&CachedVersion> {
        match self {
            Self::UpToDate(cached) => Some(&**cached),
            Self::Stale(_) => None,
        }
    }

    /// Why the record cannot be reused, on a miss.
    pub fn miss(&self) -> Option<&CacheMiss> {
        match self {
            Self::UpToDate(_) => None,
            Self::Stale(miss) => Some(miss),
        }
    }
}

/// Reads, writes and clears the records of one cache id.
#[derive(Debug, Clone)]
pub struct VersionCacheManager {
    directory: CacheDirectory,
    options: VersionCacheOptions,
    codec: CompositeCodec,
}

impl VersionCacheManager {
    /// Create a manager for the cache id in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidCacheId`] if the id cannot be used as a
    /// file name.
    pub fn new(
        directory: CacheDirectory,
        options: VersionCacheOptions,
        codec: CompositeCodec,
    ) -> CacheResult<Self> {
        validate_cache_id(&options.cache_id)?;
        Ok(Self {
            directory,
            options,
            codec,
        })
    }

    /// The cache id this manager reads and writes.
    pub fn cache_id(&self) -> &str {
        &self.options.cache_id
    }

    /// The options the manager was created with.
    pub fn options(&self) -> &VersionCacheOptions {
        &self.options
    }

    /// Where the records live.
    pub fn directory(&self) -> &CacheDirectory {
        &self.directory
    }

    /// Codecs for the extension payloads.
    pub fn codec(&self) -> &CompositeCodec {
        &self.codec
    }

    /// The hash record for this cache id.
    pub fn hash_file(&self) -> VersionHashFile {
        VersionHashFile::new(&self.directory, &self.options)
    }

    /// Check whether the stored record can be reused for `fingerprint`.
    ///
    /// Checks run in order (presence, schema, cache id, fingerprint, age,
    /// payload) and the first failing one is the miss reason. A record that
    /// cannot be decoded is a miss, not an error.
    #[instrument(skip_all, fields(cache_id = %self.options.cache_id))]
    pub async fn is_cache_up_to_date(
        &self,
        fingerprint: &CacheFingerprint,
    ) -> CacheResult<CacheStatus> {
        let path = self.directory.cache_file(self.cache_id());
        let bytes = {
            let mut file = LockedFile::acquire(&path, self.options.lock_timeout).await?;
            file.read_all()?
        };
        let status = self.evaluate(&bytes, fingerprint, SystemTime::now());
        if let Some(miss) = status.miss() {
            debug!(%miss, "cache record not reusable");
        }
        Ok(status)
    }

    fn evaluate(&self, bytes: &[u8], fingerprint: &CacheFingerprint, now: SystemTime) -> CacheStatus {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return CacheStatus::Stale(CacheMiss::NoCacheRecord);
        }
        let header: RecordHeader = match serde_json::from_slice(bytes) {
            Ok(header) => header,
            Err(e) => return decode_failure(e),
        };
        if header.schema_version != CACHE_SCHEMA_VERSION {
            return CacheStatus::Stale(CacheMiss::SchemaVersionMismatch {
                found: header.schema_version,
                supported: CACHE_SCHEMA_VERSION,
            });
        }
        if header.cache_id != self.options.cache_id {
            return CacheStatus::Stale(CacheMiss::CacheIdMismatch {
                expected: self.options.cache_id.clone(),
                found: header.cache_id,
            });
        }
        if CacheFingerprint::from_hex(&header.fingerprint) != Some(*fingerprint) {
            return CacheStatus::Stale(CacheMiss::FingerprintMismatch);
        }
        let Some(created_at) = UNIX_EPOCH.checked_add(Duration::from_secs(header.created_at))
        else {
            return CacheStatus::Stale(CacheMiss::DecodeFailure {
                reason: "created_at out of range".to_string(),
            });
        };
        if let Some(retention) = self.options.retention {
            let age = now.duration_since(created_at).unwrap_or_default();
            if age > retention {
                return CacheStatus::Stale(CacheMiss::Expired {
                    age_secs: age.as_secs(),
                });
            }
        }

        let record: VersionCacheRecord = match serde_json::from_slice(bytes) {
            Ok(record) => record,
            Err(e) => return decode_failure(e),
        };
        match self.codec.decode(record.extensions) {
            Ok(extensions) => CacheStatus::UpToDate(Box::new(CachedVersion {
                cache: record.version,
                extensions,
                created_at,
            })),
            Err(reason) => CacheStatus::Stale(CacheMiss::DecodeFailure { reason }),
        }
    }

    /// Replace the cache record with `version` computed for `fingerprint`.
    #[instrument(skip_all, fields(cache_id = %self.options.cache_id, version = %version.version))]
    pub async fn write(
        &self,
        fingerprint: &CacheFingerprint,
        version: &VersionCache,
        extensions: &ExtensionPayloads,
    ) -> CacheResult<()> {
        let record = VersionCacheRecord {
            schema_version: CACHE_SCHEMA_VERSION,
            cache_id: self.options.cache_id.clone(),
            fingerprint: fingerprint.to_hex(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: version.clone(),
            extensions: self.codec.encode(extensions)?,
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let path = self.directory.cache_file(self.cache_id());
        let mut file = LockedFile::acquire(&path, self.options.lock_timeout).await?;
        file.rewrite(&json)?;
        debug!(%path, "cache record written");
        Ok(())
    }

    /// Empty both records of this cache id.
    ///
    /// Files are truncated under their locks rather than removed, so a
    /// concurrent holder never sees a record vanish under it.
    #[instrument(skip_all, fields(cache_id = %self.options.cache_id))]
    pub async fn clear(&self) -> CacheResult<()> {
        let paths = [
            self.directory.hash_file(self.cache_id()),
            self.directory.cache_file(self.cache_id()),
        ];
        for path in &paths {
            if !path.exists() {
                continue;
            }
            let mut file = LockedFile::acquire(path, self.options.lock_timeout).await?;
            file.rewrite(&[])?;
        }
        debug!("cache cleared");
        Ok(())
    }
}

fn decode_failure(error: serde_json::Error) -> CacheStatus {
    CacheStatus::Stale(CacheMiss::DecodeFailure {
        reason: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        ConfigurationSource, JsonExtension, RepositoryHeadState, VersionCacheManagerContext,
        compute_fingerprint,
    };
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn manager_with(options: VersionCacheOptions) -> (TempDir, VersionCacheManager) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let context = VersionCacheManagerContext::new();
        context
            .register_extension(JsonExtension::<u32>::new("commit-count"))
            .unwrap();
        let manager =
            VersionCacheManager::new(CacheDirectory::new(root), options, context.codec()).unwrap();
        (dir, manager)
    }

    fn manager() -> (TempDir, VersionCacheManager) {
        manager_with(VersionCacheOptions {
            cache_id: "X".into(),
            lock_timeout: Duration::from_millis(200),
            ..Default::default()
        })
    }

    fn fingerprint(config: &str) -> CacheFingerprint {
        compute_fingerprint(
            &RepositoryHeadState::default(),
            &[ConfigurationSource::new("nextver.toml", config)],
        )
    }

    fn payload() -> VersionCache {
        VersionCache {
            version: Version::new(1, 3, 0),
            previous_version: Some(Version::new(1, 2, 0)),
            branch: Some("main".into()),
            commit: Some("abc123".into()),
        }
    }

    fn record_path(manager: &VersionCacheManager) -> Utf8PathBuf {
        manager.directory().cache_file(manager.cache_id())
    }

    #[tokio::test]
    async fn missing_record_is_a_miss() {
        let (_dir, manager) = manager();
        let status = manager.is_cache_up_to_date(&fingerprint("a")).await.unwrap();
        assert_eq!(status.miss(), Some(&CacheMiss::NoCacheRecord));
    }

    #[tokio::test]
    async fn written_record_is_reused_with_extensions() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        let mut extensions = ExtensionPayloads::new();
        extensions.insert("commit-count", 5u32);

        manager.write(&fp, &payload(), &extensions).await.unwrap();
        let status = manager.is_cache_up_to_date(&fp).await.unwrap();

        let cached = status.cached().expect("cache hit");
        assert_eq!(cached.cache, payload());
        assert_eq!(cached.extensions.get::<u32>("commit-count"), Some(&5));
    }

    #[tokio::test]
    async fn other_fingerprint_is_a_miss() {
        let (_dir, manager) = manager();
        manager
            .write(&fingerprint("a"), &payload(), &ExtensionPayloads::new())
            .await
            .unwrap();
        let status = manager.is_cache_up_to_date(&fingerprint("b")).await.unwrap();
        assert_eq!(status.miss(), Some(&CacheMiss::FingerprintMismatch));
    }

    #[tokio::test]
    async fn newer_schema_is_a_miss_not_an_error() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        std::fs::write(
            record_path(&manager),
            format!(
                r#"{{"schema_version": 2, "cache_id": "X", "fingerprint": "{fp}", "created_at": 0,
                    "version": {{"version": "9.9.9"}}, "new_field": {{"nested": true}}}}"#
            ),
        )
        .unwrap();

        let status = manager.is_cache_up_to_date(&fp).await.unwrap();
        assert_eq!(
            status.miss(),
            Some(&CacheMiss::SchemaVersionMismatch {
                found: 2,
                supported: CACHE_SCHEMA_VERSION
            })
        );
    }

    #[tokio::test]
    async fn record_of_other_cache_id_is_a_miss() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        std::fs::write(
            record_path(&manager),
            format!(
                r#"{{"schema_version": 1, "cache_id": "Y", "fingerprint": "{fp}", "created_at": 0,
                    "version": {{"version": "1.0.0"}}}}"#
            ),
        )
        .unwrap();

        let status = manager.is_cache_up_to_date(&fp).await.unwrap();
        assert!(matches!(status.miss(), Some(CacheMiss::CacheIdMismatch { .. })));
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_miss() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        std::fs::write(
            record_path(&manager),
            format!(
                r#"{{"schema_version": 1, "cache_id": "X", "fingerprint": "{fp}", "created_at": 0,
                    "version": {{"version": "not-semver"}}}}"#
            ),
        )
        .unwrap();

        let status = manager.is_cache_up_to_date(&fp).await.unwrap();
        assert!(matches!(status.miss(), Some(CacheMiss::DecodeFailure { .. })));
    }

    #[tokio::test]
    async fn truncated_record_is_a_miss() {
        let (_dir, manager) = manager();
        std::fs::write(record_path(&manager), br#"{"schema_version": 1, "cache_"#).unwrap();
        let status = manager.is_cache_up_to_date(&fingerprint("a")).await.unwrap();
        assert!(matches!(status.miss(), Some(CacheMiss::DecodeFailure { .. })));
    }

    #[tokio::test]
    async fn unrepresentable_timestamp_is_a_miss() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        std::fs::write(
            record_path(&manager),
            format!(
                r#"{{"schema_version": 1, "cache_id": "X", "fingerprint": "{fp}",
                    "created_at": 18446744073709551615, "version": {{"version": "1.0.0"}}}}"#
            ),
        )
        .unwrap();

        let status = manager.is_cache_up_to_date(&fp).await.unwrap();
        assert_eq!(
            status.miss(),
            Some(&CacheMiss::DecodeFailure {
                reason: "created_at out of range".into()
            })
        );
    }

    #[tokio::test]
    async fn held_record_lock_times_out_check() {
        let (_dir, manager) = manager_with(VersionCacheOptions {
            cache_id: "X".into(),
            lock_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let _holder = LockedFile::acquire(&record_path(&manager), Duration::from_millis(50))
            .await
            .unwrap();

        let err = manager.is_cache_up_to_date(&fingerprint("a")).await.unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn held_record_lock_times_out_write() {
        let (_dir, manager) = manager_with(VersionCacheOptions {
            cache_id: "X".into(),
            lock_timeout: Duration::from_millis(50),
            ..Default::default()
        });
        let holder = LockedFile::acquire(&record_path(&manager), Duration::from_millis(50))
            .await
            .unwrap();

        let err = manager
            .write(&fingerprint("a"), &payload(), &ExtensionPayloads::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::LockTimeout { .. }));

        drop(holder);
        let status = manager.is_cache_up_to_date(&fingerprint("a")).await.unwrap();
        assert_eq!(status.miss(), Some(&CacheMiss::NoCacheRecord));
    }

    #[test]
    fn record_older_than_retention_is_expired() {
        let (_dir, manager) = manager_with(VersionCacheOptions {
            cache_id: "X".into(),
            retention: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let fp = fingerprint("a");
        let bytes = format!(
            r#"{{"schema_version": 1, "cache_id": "X", "fingerprint": "{fp}", "created_at": 1000,
                "version": {{"version": "1.0.0"}}}}"#
        );

        let fresh = UNIX_EPOCH + Duration::from_secs(1030);
        assert!(manager.evaluate(bytes.as_bytes(), &fp, fresh).is_up_to_date());

        let stale = UNIX_EPOCH + Duration::from_secs(1100);
        assert_eq!(
            manager.evaluate(bytes.as_bytes(), &fp, stale).miss(),
            Some(&CacheMiss::Expired { age_secs: 100 })
        );
    }

    #[tokio::test]
    async fn clear_empties_both_records() {
        let (_dir, manager) = manager();
        let fp = fingerprint("a");
        manager.hash_file().is_up_to_date_otherwise_update(&fp).await.unwrap();
        manager
            .write(&fp, &payload(), &ExtensionPayloads::new())
            .await
            .unwrap();

        manager.clear().await.unwrap();

        let status = manager.is_cache_up_to_date(&fp).await.unwrap();
        assert_eq!(status.miss(), Some(&CacheMiss::NoCacheRecord));
        let hash = manager.hash_file().is_up_to_date_otherwise_update(&fp).await.unwrap();
        assert_eq!(hash.reason, Some(CacheMiss::NoPriorHash));
    }

    #[test]
    fn invalid_cache_id_is_rejected() {
        let err = VersionCacheManager::new(
            CacheDirectory::new("/tmp"),
            VersionCacheOptions {
                cache_id: "../../etc".into(),
                ..Default::default()
            },
            CompositeCodec::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidCacheId { .. }));
    }
}
