//! Next-version computation from tags and commit history.
//!
//! The latest `<prefix><semver>` tag is the current version. Every commit
//! after it contributes a bump level read from its conventional-commit
//! header, and the highest level wins.

pub mod conventional;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

pub use conventional::{ConventionalCommit, bump_level_for};

/// Errors from version operations.
#[derive(Error, Debug)]
pub enum VersionError {
    /// Failed to parse a semver string.
    #[error("invalid semver: {0}")]
    InvalidSemver(#[from] semver::Error),

    /// A tag did not carry the configured prefix.
    #[error("tag `{tag}` does not start with `{prefix}`")]
    MissingPrefix {
        /// The tag as found in the repository.
        tag: String,
        /// The configured tag prefix.
        prefix: String,
    },

    /// The bumped component would not fit in a `u64`.
    #[error("cannot apply a {level} bump to {version}")]
    Overflow {
        /// The version being bumped.
        version: Version,
        /// The requested bump.
        level: BumpLevel,
    },

    /// A git operation failed.
    #[error("git error: {0}")]
    Git(#[from] crate::git::GitError),
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Semver bump level, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// Patch release (x.y.Z).
    Patch,
    /// Minor release (x.Y.0).
    Minor,
    /// Major release (X.0.0).
    Major,
}

impl std::fmt::Display for BumpLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Patch => write!(f, "patch"),
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
        }
    }
}

/// Compute the next version by applying a bump level.
///
/// # Errors
///
/// Returns [`VersionError::Overflow`] if the bumped component is already
/// `u64::MAX`.
pub fn next_version(current: &Version, level: BumpLevel) -> VersionResult<Version> {
    let overflow = || VersionError::Overflow {
        version: current.clone(),
        level,
    };
    let next = match level {
        BumpLevel::Patch => Version::new(
            current.major,
            current.minor,
            current.patch.checked_add(1).ok_or_else(overflow)?,
        ),
        BumpLevel::Minor => {
            Version::new(current.major, current.minor.checked_add(1).ok_or_else(overflow)?, 0)
        }
        BumpLevel::Major => Version::new(current.major.checked_add(1).ok_or_else(overflow)?, 0, 0),
    };
    Ok(next)
}

/// Parse a version string, stripping an optional `v` prefix.
pub fn parse_version(s: &str) -> VersionResult<Version> {
    let s = s.strip_prefix('v').unwrap_or(s);
    Ok(Version::parse(s)?)
}

/// Parse a tag such as `release-1.2.3` given its prefix.
pub fn parse_tag(tag: &str, prefix: &str) -> VersionResult<Version> {
    let version = tag
        .strip_prefix(prefix)
        .ok_or_else(|| VersionError::MissingPrefix {
            tag: tag.to_string(),
            prefix: prefix.to_string(),
        })?;
    Ok(Version::parse(version)?)
}

/// The result of [`compute_next_version`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionComputation {
    /// The next version.
    pub version: Version,
    /// `None` when the version was not bumped.
    pub bump: Option<BumpLevel>,
    /// Commits considered.
    pub commit_count: usize,
}

/// Decide the next version.
///
/// Without a current version the answer is `initial`. Without commits since
/// the current version it is returned unchanged. Otherwise the highest bump
/// level among `messages` is applied; commits without a recognised type
/// still count as a patch.
///
/// # Errors
///
/// Returns [`VersionError::Overflow`] if the bump does not fit.
#[instrument(skip(messages), fields(commits = messages.len()))]
pub fn compute_next_version(
    current: Option<&Version>,
    messages: &[String],
    initial: &Version,
) -> VersionResult<VersionComputation> {
    let Some(current) = current else {
        debug!(%initial, "no version tag, using initial version");
        return Ok(VersionComputation {
            version: initial.clone(),
            bump: None,
            commit_count: messages.len(),
        });
    };

    let bump = messages
        .iter()
        .map(|message| bump_level_for(message).unwrap_or(BumpLevel::Patch))
        .max();

    let version = match bump {
        Some(level) => next_version(current, level)?,
        None => current.clone(),
    };
    debug!(%current, %version, ?bump, "computed next version");
    Ok(VersionComputation {
        version,
        bump,
        commit_count: messages.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn bump_patch() {
        let v = Version::new(1, 2, 3);
        assert_eq!(next_version(&v, BumpLevel::Patch).unwrap(), Version::new(1, 2, 4));
    }

    #[test]
    fn bump_minor() {
        let v = Version::new(1, 2, 3);
        assert_eq!(next_version(&v, BumpLevel::Minor).unwrap(), Version::new(1, 3, 0));
    }

    #[test]
    fn bump_major() {
        let v = Version::new(1, 2, 3);
        assert_eq!(next_version(&v, BumpLevel::Major).unwrap(), Version::new(2, 0, 0));
    }

    #[test]
    fn bump_past_u64_max_is_an_error() {
        let patch = Version::new(1, 2, u64::MAX);
        assert!(matches!(
            next_version(&patch, BumpLevel::Patch),
            Err(VersionError::Overflow {
                level: BumpLevel::Patch,
                ..
            })
        ));
        // Bumps that reset the saturated component still work.
        assert_eq!(
            next_version(&patch, BumpLevel::Minor).unwrap(),
            Version::new(1, 3, 0)
        );
        assert!(next_version(&Version::new(u64::MAX, 0, 0), BumpLevel::Major).is_err());
    }

    #[test]
    fn saturated_tag_fails_computation() {
        let current = parse_tag("v1.2.18446744073709551615", "v").unwrap();
        let err = compute_next_version(
            Some(&current),
            &messages(&["fix: one more"]),
            &Version::new(0, 1, 0),
        )
        .unwrap_err();
        assert!(err.to_string().contains("patch"));
    }

    #[test]
    fn bump_levels_are_ordered() {
        assert!(BumpLevel::Patch < BumpLevel::Minor);
        assert!(BumpLevel::Minor < BumpLevel::Major);
    }

    #[test]
    fn parse_with_v_prefix() {
        assert_eq!(parse_version("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_version("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert!(parse_version("not-a-version").is_err());
    }

    #[test]
    fn parse_tag_with_custom_prefix() {
        assert_eq!(
            parse_tag("release-2.0.1", "release-").unwrap(),
            Version::new(2, 0, 1)
        );
        assert!(matches!(
            parse_tag("v2.0.1", "release-"),
            Err(VersionError::MissingPrefix { .. })
        ));
    }

    #[test]
    fn no_tag_yields_initial_version() {
        let initial = Version::new(0, 1, 0);
        let result = compute_next_version(None, &messages(&["feat: start"]), &initial).unwrap();
        assert_eq!(result.version, initial);
        assert_eq!(result.bump, None);
        assert_eq!(result.commit_count, 1);
    }

    #[test]
    fn no_commits_keeps_current_version() {
        let current = Version::new(1, 4, 2);
        let result = compute_next_version(Some(&current), &[], &Version::new(0, 1, 0)).unwrap();
        assert_eq!(result.version, current);
        assert_eq!(result.bump, None);
    }

    #[test]
    fn highest_bump_wins() {
        let current = Version::new(1, 4, 2);
        let result = compute_next_version(
            Some(&current),
            &messages(&["fix: a", "feat(cli): b", "chore: c"]),
            &Version::new(0, 1, 0),
        )
        .unwrap();
        assert_eq!(result.version, Version::new(1, 5, 0));
        assert_eq!(result.bump, Some(BumpLevel::Minor));
        assert_eq!(result.commit_count, 3);
    }

    #[test]
    fn breaking_change_is_major() {
        let current = Version::new(1, 4, 2);
        let result = compute_next_version(
            Some(&current),
            &messages(&["fix: a", "refactor!: drop old api"]),
            &Version::new(0, 1, 0),
        )
        .unwrap();
        assert_eq!(result.version, Version::new(2, 0, 0));
    }

    #[test]
    fn unconventional_commits_still_patch() {
        let current = Version::new(1, 0, 0);
        let result = compute_next_version(
            Some(&current),
            &messages(&["Update README"]),
            &Version::new(0, 1, 0),
        )
        .unwrap();
        assert_eq!(result.version, Version::new(1, 0, 1));
        assert_eq!(result.bump, Some(BumpLevel::Patch));
    }
}
