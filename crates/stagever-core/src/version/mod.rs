//! Version arithmetic.
//!
//! This module owns the vocabulary shared by every versioning path: bump
//! levels, release types, tag parsing, and the two pure building blocks
//! used by the engine:
//!
//! - [`determine`] reduces a set of issues to a single [`BumpLevel`]
//! - [`calculate`] applies a bump to a baseline version

pub mod calculate;
pub mod determine;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from version operations.
#[derive(Error, Debug)]
pub enum VersionError {
    /// Failed to parse a semver string.
    #[error("invalid semver: {0}")]
    InvalidSemver(#[from] semver::Error),

    /// A version component cannot be incremented any further.
    #[error("{component} component of {version} would overflow")]
    Overflow {
        /// The version being bumped.
        version: Version,
        /// Which component overflowed.
        component: &'static str,
    },
}

/// Result alias for version operations.
pub type VersionResult<T> = Result<T, VersionError>;

/// Semver bump level, ordered by severity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    /// Patch release (x.y.Z).
    #[serde(alias = "PATCH", alias = "Patch")]
    Patch,
    /// Minor release (x.Y.z).
    #[serde(alias = "MINOR", alias = "Minor")]
    Minor,
    /// Major release (X.y.z).
    #[serde(alias = "MAJOR", alias = "Major")]
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

/// The kind of change that produced a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    /// Produced by a major bump.
    Major,
    /// Produced by a minor bump.
    Minor,
    /// Produced by a patch bump.
    Patch,
    /// An imported prerelease.
    Prerelease,
}

impl ReleaseType {
    /// Returns the release type as a lowercase string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
            Self::Prerelease => "prerelease",
        }
    }

    /// Infer the release type of a version that was not computed here.
    ///
    /// Prereleases are always [`ReleaseType::Prerelease`]; otherwise the
    /// lowest non-zero component decides (`1.4.0` is a minor release).
    pub fn infer(version: &Version) -> Self {
        if !version.pre.is_empty() {
            Self::Prerelease
        } else if version.patch > 0 {
            Self::Patch
        } else if version.minor > 0 {
            Self::Minor
        } else {
            Self::Major
        }
    }
}

impl From<BumpLevel> for ReleaseType {
    fn from(level: BumpLevel) -> Self {
        match level {
            BumpLevel::Patch => Self::Patch,
            BumpLevel::Minor => Self::Minor,
            BumpLevel::Major => Self::Major,
        }
    }
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "major" => Ok(Self::Major),
            "minor" => Ok(Self::Minor),
            "patch" => Ok(Self::Patch),
            "prerelease" => Ok(Self::Prerelease),
            other => Err(format!("unknown release type: {other}")),
        }
    }
}

/// The baseline used when an environment has no versions yet.
pub const fn zero() -> Version {
    Version::new(0, 0, 0)
}

/// Parse a version string, stripping an optional `v` or `V` prefix.
pub fn parse_version(s: &str) -> VersionResult<Version> {
    let s = s.trim();
    let s = s
        .strip_prefix('v')
        .or_else(|| s.strip_prefix('V'))
        .unwrap_or(s);
    Ok(Version::parse(s)?)
}
