//! Version persistence.
//!
//! The [`VersionStore`] trait is the only shared mutable resource in the
//! engine. Every mutation is a single atomic insert-or-update keyed by a
//! uniqueness invariant, so retried or duplicated webhook deliveries are
//! harmless:
//!
//! - versions are unique per `(repository, environment, version)`; a
//!   repeated upsert only refreshes `updated_at`
//! - issue links are unique per `(version, issue)`; relinking is a no-op
//! - releases are unique per `(repository, tag)`
//! - version files are unique per `(repository, environment)`
//!
//! Two implementations ship: [`memory::MemoryStore`] and
//! [`sqlite::SqliteStore`].

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::environment::Environment;
use crate::version::calculate::VersionCalc;
use crate::version::{ReleaseType, zero};
use crate::version_file::VersionFileRecord;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Row identifier of a stored version.
pub type VersionId = i64;

/// Errors from the version store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("storage error during {operation}: {message}")]
    Storage {
        /// What was being attempted.
        operation: &'static str,
        /// Backend error text.
        message: String,
    },

    /// A stored row cannot be decoded.
    #[error("corrupt stored data: {0}")]
    Corruption(String),

    /// A referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
}

impl StoreError {
    /// Create a storage error with context.
    pub fn storage(operation: &'static str, message: impl ToString) -> Self {
        Self::Storage {
            operation,
            message: message.to_string(),
        }
    }

    /// Create a corruption error with context.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption(message.into())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle state of a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    /// Computed, not yet promoted or released.
    Pending,
    /// Promoted and ready to ship.
    Ready,
    /// Published upstream.
    Released,
    /// Abandoned after a failure.
    Failed,
    /// Withdrawn.
    Cancelled,
}

impl VersionStatus {
    /// Returns the status as a lowercase string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Released => "released",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether versions in this state count towards the current version.
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "released" => Ok(Self::Released),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown version status: {other}")),
        }
    }
}

/// A persisted version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// Row id.
    pub id: VersionId,
    /// Owning repository.
    pub repository_id: String,
    /// Full SemVer string (e.g. `2.3.1-rc.1`).
    pub version: String,
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Prerelease identifier, if any.
    pub prerelease: Option<String>,
    /// Build metadata, if any.
    pub build_metadata: Option<String>,
    /// The change that produced this version.
    pub release_type: ReleaseType,
    /// Lifecycle state.
    pub status: VersionStatus,
    /// Environment this version line belongs to.
    pub environment: Environment,
    /// Branch the version originated from.
    pub branch: String,
    /// Convenience flag, `environment == production`.
    pub is_production: bool,
    /// The version this one was promoted from.
    pub parent_version_id: Option<VersionId>,
    /// Generated changelog text.
    pub changelog: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last bookkeeping update.
    pub updated_at: DateTime<Utc>,
    /// When the version was released or promoted.
    pub released_at: Option<DateTime<Utc>>,
}

impl VersionRecord {
    /// Parse the stored version string.
    ///
    /// A string that does not parse, or that disagrees with the stored
    /// numeric columns, is reported as corruption.
    pub fn semver(&self) -> StoreResult<Version> {
        let parsed = Version::parse(&self.version).map_err(|e| {
            StoreError::corruption(format!("version {} of {}: {e}", self.id, self.repository_id))
        })?;
        if (parsed.major, parsed.minor, parsed.patch) != (self.major, self.minor, self.patch) {
            return Err(StoreError::corruption(format!(
                "version {} string {} disagrees with {}.{}.{}",
                self.id, self.version, self.major, self.minor, self.patch
            )));
        }
        Ok(parsed)
    }

    /// Ordering key for "current version" selection.
    pub(crate) fn precedence(&self) -> (u64, u64, u64, DateTime<Utc>, VersionId) {
        (self.major, self.minor, self.patch, self.created_at, self.id)
    }
}

/// A version about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    /// Owning repository.
    pub repository_id: String,
    /// The version, including prerelease and build metadata.
    pub version: Version,
    /// The change that produced it.
    pub release_type: ReleaseType,
    /// Initial status.
    pub status: VersionStatus,
    /// Target environment.
    pub environment: Environment,
    /// Originating branch.
    pub branch: String,
    /// Promotion source.
    pub parent_version_id: Option<VersionId>,
    /// Release or promotion time.
    pub released_at: Option<DateTime<Utc>>,
}

impl NewVersion {
    /// A pending version from a calculation.
    pub fn pending(
        repository_id: &str,
        branch: &str,
        environment: Environment,
        calc: &VersionCalc,
    ) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            version: calc.version.clone(),
            release_type: calc.release_type,
            status: VersionStatus::Pending,
            environment,
            branch: branch.to_string(),
            parent_version_id: None,
            released_at: None,
        }
    }

    pub(crate) fn prerelease(&self) -> Option<String> {
        (!self.version.pre.is_empty()).then(|| self.version.pre.to_string())
    }

    pub(crate) fn build_metadata(&self) -> Option<String> {
        (!self.version.build.is_empty()).then(|| self.version.build.to_string())
    }
}

/// Association between a version and an issue it ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionIssue {
    /// The version.
    pub version_id: VersionId,
    /// The issue.
    pub issue_id: String,
    /// Generated title, owned by the changelog collaborator.
    pub ai_title: Option<String>,
    /// Generated summary, owned by the changelog collaborator.
    pub ai_summary: Option<String>,
    /// When the link was made.
    pub created_at: DateTime<Utc>,
}

/// Release metadata about to be upserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    /// Owning repository.
    pub repository_id: String,
    /// Tag as published (e.g. `v1.4.0`).
    pub tag_name: String,
    /// Release title.
    pub name: Option<String>,
    /// Release notes.
    pub body: Option<String>,
    /// Web URL of the release.
    pub url: Option<String>,
    /// Whether upstream flagged it as a prerelease.
    pub prerelease: bool,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// The version the tag names.
    pub version_id: VersionId,
}

/// A persisted release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRecord {
    /// Row id.
    pub id: i64,
    /// Owning repository.
    pub repository_id: String,
    /// Tag as published.
    pub tag_name: String,
    /// Release title.
    pub name: Option<String>,
    /// Release notes.
    pub body: Option<String>,
    /// Web URL of the release.
    pub url: Option<String>,
    /// Prerelease flag.
    pub prerelease: bool,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// The version the tag names.
    pub version_id: VersionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

/// Persistence for versions, their issue links, releases, and version files.
pub trait VersionStore: Send + Sync {
    /// Insert a version, or touch `updated_at` of the existing row with the
    /// same `(repository, environment, version)`. Never changes numbers or
    /// status of an existing row.
    fn upsert_version(&self, new: &NewVersion) -> StoreResult<VersionRecord>;

    /// Link an issue to a version. Returns `false` if the link existed.
    fn link_issue(&self, version_id: VersionId, issue_id: &str) -> StoreResult<bool>;

    /// Fetch a version by id.
    fn get_version(&self, version_id: VersionId) -> StoreResult<Option<VersionRecord>>;

    /// Fetch a version by its exact string within an environment.
    fn find_version(
        &self,
        repository_id: &str,
        environment: Environment,
        version: &str,
    ) -> StoreResult<Option<VersionRecord>>;

    /// The highest live version of an environment, ties to the newest.
    fn latest_version(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionRecord>>;

    /// All versions of a repository, newest first.
    fn list_versions(
        &self,
        repository_id: &str,
        environment: Option<Environment>,
    ) -> StoreResult<Vec<VersionRecord>>;

    /// Issue links of a version, oldest first.
    fn linked_issues(&self, version_id: VersionId) -> StoreResult<Vec<VersionIssue>>;

    /// Move a version to a new status, optionally stamping `released_at`.
    fn set_status(
        &self,
        version_id: VersionId,
        status: VersionStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> StoreResult<VersionRecord>;

    /// Attach changelog text to a version.
    fn set_changelog(&self, version_id: VersionId, changelog: &str) -> StoreResult<()>;

    /// Attach generated title and summary to an issue link.
    fn annotate_issue(
        &self,
        version_id: VersionId,
        issue_id: &str,
        title: Option<&str>,
        summary: Option<&str>,
    ) -> StoreResult<()>;

    /// Insert or update release metadata keyed by `(repository, tag)`.
    fn upsert_release(&self, release: &NewRelease) -> StoreResult<ReleaseRecord>;

    /// Replace the version file of a `(repository, environment)`.
    fn upsert_version_file(&self, record: &VersionFileRecord) -> StoreResult<()>;

    /// The version file of a `(repository, environment)`.
    fn version_file(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionFileRecord>>;

    /// The current version of an environment, `0.0.0` when there is none.
    fn current_version(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Version> {
        match self.latest_version(repository_id, environment)? {
            Some(record) => record.semver(),
            None => Ok(zero()),
        }
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every store implementation must share.

    use super::*;
    use crate::version::BumpLevel;
    use crate::version::calculate::{CalculationMode, calculate};

    fn pending(store: &dyn VersionStore, env: Environment, v: Version) -> VersionRecord {
        let calc = calculate(&v, BumpLevel::Patch, CalculationMode::Standard).unwrap();
        let mut new = NewVersion::pending("web", "dev", env, &calc);
        new.version = v;
        store.upsert_version(&new).unwrap()
    }

    pub(crate) fn upsert_is_idempotent(store: &dyn VersionStore) {
        let first = pending(store, Environment::Development, Version::new(0, 2, 2));
        let second = pending(store, Environment::Development, Version::new(0, 2, 2));
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, VersionStatus::Pending);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.list_versions("web", None).unwrap().len(), 1);
    }

    pub(crate) fn upsert_keeps_status_on_conflict(store: &dyn VersionStore) {
        let first = pending(store, Environment::Development, Version::new(1, 0, 0));
        store
            .set_status(first.id, VersionStatus::Released, Some(Utc::now()))
            .unwrap();
        let again = pending(store, Environment::Development, Version::new(1, 0, 0));
        assert_eq!(again.id, first.id);
        assert_eq!(again.status, VersionStatus::Released);
        assert!(again.released_at.is_some());
    }

    pub(crate) fn same_version_in_two_environments(store: &dyn VersionStore) {
        let dev = pending(store, Environment::Development, Version::new(0, 3, 1));
        let prod = pending(store, Environment::Production, Version::new(0, 3, 1));
        assert_ne!(dev.id, prod.id);
        assert!(prod.is_production);
        assert!(!dev.is_production);
    }

    pub(crate) fn link_is_idempotent(store: &dyn VersionStore) {
        let v = pending(store, Environment::Development, Version::new(0, 0, 1));
        assert!(store.link_issue(v.id, "i-1").unwrap());
        assert!(!store.link_issue(v.id, "i-1").unwrap());
        assert!(store.link_issue(v.id, "i-2").unwrap());
        let links = store.linked_issues(v.id).unwrap();
        let ids: Vec<_> = links.iter().map(|l| l.issue_id.as_str()).collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);
    }

    pub(crate) fn link_to_missing_version_fails(store: &dyn VersionStore) {
        assert!(store.link_issue(4242, "i-1").is_err());
    }

    pub(crate) fn current_version_picks_highest_live(store: &dyn VersionStore) {
        assert_eq!(
            store
                .current_version("web", Environment::Development)
                .unwrap(),
            Version::new(0, 0, 0)
        );
        pending(store, Environment::Development, Version::new(0, 2, 1));
        let top = pending(store, Environment::Development, Version::new(0, 10, 0));
        pending(store, Environment::Development, Version::new(0, 9, 9));
        assert_eq!(
            store
                .current_version("web", Environment::Development)
                .unwrap(),
            Version::new(0, 10, 0)
        );

        store
            .set_status(top.id, VersionStatus::Failed, None)
            .unwrap();
        assert_eq!(
            store
                .current_version("web", Environment::Development)
                .unwrap(),
            Version::new(0, 9, 9)
        );
        // other environments are unaffected
        assert_eq!(
            store.current_version("web", Environment::Staging).unwrap(),
            Version::new(0, 0, 0)
        );
    }

    pub(crate) fn ties_go_to_the_newest(store: &dyn VersionStore) {
        let rc1 = pending(
            store,
            Environment::Staging,
            Version::parse("2.3.1-rc.1").unwrap(),
        );
        let rc2 = pending(
            store,
            Environment::Staging,
            Version::parse("2.3.1-rc.2").unwrap(),
        );
        let latest = store
            .latest_version("web", Environment::Staging)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, rc2.id);
        assert_ne!(latest.id, rc1.id);
        assert_eq!(latest.prerelease.as_deref(), Some("rc.2"));
    }

    pub(crate) fn annotations_and_changelog(store: &dyn VersionStore) {
        let v = pending(store, Environment::Development, Version::new(0, 1, 0));
        store.link_issue(v.id, "i-1").unwrap();
        store
            .annotate_issue(v.id, "i-1", Some("Faster login"), Some("Login is faster"))
            .unwrap();
        store.set_changelog(v.id, "- Faster login").unwrap();

        let links = store.linked_issues(v.id).unwrap();
        assert_eq!(links[0].ai_title.as_deref(), Some("Faster login"));
        assert_eq!(links[0].ai_summary.as_deref(), Some("Login is faster"));
        let stored = store.get_version(v.id).unwrap().unwrap();
        assert_eq!(stored.changelog.as_deref(), Some("- Faster login"));
        assert!(store.annotate_issue(v.id, "missing", None, None).is_err());
    }

    pub(crate) fn release_upsert_by_tag(store: &dyn VersionStore) {
        let v = pending(store, Environment::Production, Version::new(1, 4, 0));
        let mut release = NewRelease {
            repository_id: "web".into(),
            tag_name: "v1.4.0".into(),
            name: Some("First".into()),
            body: None,
            url: None,
            prerelease: false,
            published_at: None,
            version_id: v.id,
        };
        let first = store.upsert_release(&release).unwrap();
        release.name = Some("Renamed".into());
        let second = store.upsert_release(&release).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Renamed"));
    }

    pub(crate) fn version_file_roundtrip(store: &dyn VersionStore) {
        let mut record = VersionFileRecord {
            repository_id: "web".into(),
            environment: Environment::Production,
            version: "1.0.0".into(),
            build_time: Utc::now(),
            features: vec!["PROJ-1".into()],
            bugfixes: vec![],
            commit: Some("abc".into()),
        };
        store.upsert_version_file(&record).unwrap();
        record.version = "1.0.1".into();
        store.upsert_version_file(&record).unwrap();
        let stored = store
            .version_file("web", Environment::Production)
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, "1.0.1");
        assert_eq!(stored.features, vec!["PROJ-1".to_string()]);
        assert!(
            store
                .version_file("web", Environment::Staging)
                .unwrap()
                .is_none()
        );
    }

    pub(crate) fn run_all(make: impl Fn() -> Box<dyn VersionStore>) {
        upsert_is_idempotent(make().as_ref());
        upsert_keeps_status_on_conflict(make().as_ref());
        same_version_in_two_environments(make().as_ref());
        link_is_idempotent(make().as_ref());
        link_to_missing_version_fails(make().as_ref());
        current_version_picks_highest_live(make().as_ref());
        ties_go_to_the_newest(make().as_ref());
        annotations_and_changelog(make().as_ref());
        release_upsert_by_tag(make().as_ref());
        version_file_roundtrip(make().as_ref());
    }
}
