//! Deterministic digest of everything that can change the computed version.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CacheError, CacheResult};

/// Bumped whenever the digest layout changes, so old records stop matching.
const ALGORITHM_TAG: &[u8] = b"nextver/fingerprint/v1";

/// Repository state that feeds the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHeadState {
    /// Branch name, or `None` for a detached head.
    pub head_ref: Option<String>,
    /// Commit id of HEAD, or `None` for an unborn branch.
    pub head_commit: Option<String>,
    /// Latest version tag, since tagging can change the next version without
    /// moving HEAD.
    pub latest_tag: Option<String>,
    /// Whether the worktree has uncommitted changes.
    pub dirty: bool,
}

/// One configuration file as it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationSource {
    /// Where the file was read from.
    pub path: Utf8PathBuf,
    /// The file content, hashed verbatim.
    pub bytes: Vec<u8>,
}

impl ConfigurationSource {
    /// A source from already loaded bytes.
    pub fn new(path: impl Into<Utf8PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a configuration file from disk.
    pub fn read(path: &Utf8Path) -> CacheResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| CacheError::FingerprintInput {
            reason: format!("cannot read {path}: {e}"),
        })?;
        Ok(Self::new(path, bytes))
    }
}

/// SHA-256 fingerprint of a repository state plus configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheFingerprint([u8; 32]);

impl CacheFingerprint {
    /// The raw digest.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex digest, as stored in the records.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex digest; `None` for anything that is not 32 bytes of hex.
    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(digest))
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheFingerprint({})", &self.to_hex()[..12])
    }
}

/// Compute the fingerprint of `head` and `sources`.
///
/// Pure: equal inputs give equal fingerprints across processes and runs.
/// Sources are ordered by a normalized path (forward slashes, lowercase)
/// first, so neither their order nor path casing matters. Every field is
/// length-prefixed so adjacent fields cannot run into each other.
pub fn compute_fingerprint(
    head: &RepositoryHeadState,
    sources: &[ConfigurationSource],
) -> CacheFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(ALGORITHM_TAG);

    update_optional(&mut hasher, head.head_ref.as_deref());
    update_optional(&mut hasher, head.head_commit.as_deref());
    update_optional(&mut hasher, head.latest_tag.as_deref());
    hasher.update([u8::from(head.dirty)]);

    let mut ordered: Vec<(String, &ConfigurationSource)> = sources
        .iter()
        .map(|source| (normalize_path(&source.path), source))
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.bytes.cmp(&b.1.bytes)));

    hasher.update((ordered.len() as u64).to_le_bytes());
    for (key, source) in ordered {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, &source.bytes);
    }

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    CacheFingerprint(out)
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn update_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            update_field(hasher, value.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}

fn normalize_path(path: &Utf8Path) -> String {
    path.as_str().replace('\\', "/").to_lowercase()
}
