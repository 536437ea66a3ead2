//! Issue tracker collaborators.
//!
//! The engine never owns issues, repositories, or commits. It reads them
//! through three narrow ports:
//!
//! - [`IssueStore`] - issue lookup by id and by key
//! - [`RepositoryStore`] - stored per-repository policy overrides
//! - [`CommitStore`] - the latest commit, stamped into version files
//!
//! [`StaticTracker`] implements all three from an in-memory snapshot, which
//! the CLI loads from a JSON file.

pub mod extract;

use std::collections::{BTreeMap, HashMap};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::environment::BranchEnvironmentMap;
use crate::policy::{IssueTypeMap, VersioningStrategy};

/// Errors from tracker collaborators.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Failed to read a snapshot file.
    #[error("failed to read tracker snapshot {path}: {source}")]
    Read {
        /// Snapshot path.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A snapshot file is not valid JSON for the expected shape.
    #[error("invalid tracker snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    /// The backing service failed.
    #[error("tracker backend failed: {0}")]
    Backend(String),
}

/// Result alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// A tracked issue, as seen by the versioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identifier.
    pub id: String,
    /// Issue type (e.g. `BUG`, `STORY`).
    #[serde(rename = "type", alias = "issue_type")]
    pub issue_type: String,
    /// Human-facing key (e.g. `PROJ-12`).
    #[serde(alias = "key")]
    pub issue_key: String,
    /// Title.
    pub title: String,
    /// Optional long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A commit from a merge event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit hash.
    pub sha: String,
    /// Full commit message.
    pub message: String,
    /// Author name or login.
    #[serde(default)]
    pub author: String,
}

impl CommitInfo {
    /// A commit with only a message, for callers that have nothing else.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Stored per-repository policy overrides. Unset fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryRecord {
    /// Issue key prefix (e.g. `PROJ`).
    pub issue_prefix: Option<String>,
    /// Tracker project the issue keys belong to.
    pub project_id: Option<String>,
    /// Versioning strategy.
    pub strategy: Option<VersioningStrategy>,
    /// Development (accumulation) branch.
    pub development_branch: Option<String>,
    /// Branch classification overrides.
    pub branch_environments: Option<BranchEnvironmentMap>,
    /// Issue severity overrides.
    pub issue_types: Option<IssueTypeMap>,
}

/// Issue lookup.
pub trait IssueStore: Send + Sync {
    /// Fetch issues by id. Unknown ids are omitted.
    fn find_issues_by_ids(&self, ids: &[String]) -> TrackerResult<Vec<Issue>>;

    /// Find an issue by its key within a project.
    fn find_issue_by_key(&self, project_id: &str, key: &str) -> TrackerResult<Option<Issue>>;
}

/// Repository policy lookup.
pub trait RepositoryStore: Send + Sync {
    /// Fetch a repository's stored overrides, or `None` if it does not exist.
    fn get_repository(&self, repository_id: &str) -> TrackerResult<Option<RepositoryRecord>>;
}

/// Commit metadata lookup.
pub trait CommitStore: Send + Sync {
    /// The most recent commit hash known for a repository.
    fn latest_commit(&self, repository_id: &str) -> TrackerResult<Option<String>>;
}

/// On-disk shape of a tracker snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSnapshot {
    /// Issues grouped by project id.
    pub projects: BTreeMap<String, Vec<Issue>>,
    /// Latest commit per repository.
    pub latest_commits: BTreeMap<String, String>,
    /// Repository records, merged with those from configuration.
    pub repositories: BTreeMap<String, RepositoryRecord>,
}

/// In-memory tracker built from a snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticTracker {
    repositories: BTreeMap<String, RepositoryRecord>,
    issues_by_id: HashMap<String, Issue>,
    issues_by_key: HashMap<(String, String), String>,
    latest_commits: BTreeMap<String, String>,
}

impl StaticTracker {
    /// Build a tracker from a snapshot.
    pub fn from_snapshot(snapshot: TrackerSnapshot) -> Self {
        let mut tracker = Self {
            repositories: snapshot.repositories,
            latest_commits: snapshot.latest_commits,
            ..Self::default()
        };
        for (project, issues) in snapshot.projects {
            for issue in issues {
                tracker = tracker.with_issue(&project, issue);
            }
        }
        tracker
    }

    /// Load a snapshot from a JSON file.
    #[instrument]
    pub fn from_snapshot_file(path: &Utf8Path) -> TrackerResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| TrackerError::Read {
            path: path.to_string(),
            source,
        })?;
        let snapshot: TrackerSnapshot = serde_json::from_str(&raw)?;
        debug!(
            projects = snapshot.projects.len(),
            repositories = snapshot.repositories.len(),
            "loaded tracker snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Add (or replace) a repository record.
    pub fn with_repository(mut self, id: impl Into<String>, record: RepositoryRecord) -> Self {
        self.repositories.insert(id.into(), record);
        self
    }

    /// Add repository records that are not already present.
    pub fn with_default_repositories(
        mut self,
        records: impl IntoIterator<Item = (String, RepositoryRecord)>,
    ) -> Self {
        for (id, record) in records {
            self.repositories.entry(id).or_insert(record);
        }
        self
    }

    /// Add an issue to a project.
    pub fn with_issue(mut self, project_id: &str, issue: Issue) -> Self {
        self.issues_by_key.insert(
            (project_id.to_string(), issue.issue_key.to_ascii_uppercase()),
            issue.id.clone(),
        );
        self.issues_by_id.insert(issue.id.clone(), issue);
        self
    }

    /// Record the latest commit of a repository.
    pub fn with_latest_commit(mut self, repository_id: &str, sha: impl Into<String>) -> Self {
        self.latest_commits
            .insert(repository_id.to_string(), sha.into());
        self
    }

    /// Number of known repositories.
    pub fn repository_count(&self) -> usize {
        self.repositories.len()
    }

    /// Number of known issues.
    pub fn issue_count(&self) -> usize {
        self.issues_by_id.len()
    }
}

impl IssueStore for StaticTracker {
    fn find_issues_by_ids(&self, ids: &[String]) -> TrackerResult<Vec<Issue>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.issues_by_id.get(id).cloned())
            .collect())
    }

    fn find_issue_by_key(&self, project_id: &str, key: &str) -> TrackerResult<Option<Issue>> {
        Ok(self
            .issues_by_key
            .get(&(project_id.to_string(), key.to_ascii_uppercase()))
            .and_then(|id| self.issues_by_id.get(id))
            .cloned())
    }
}

impl RepositoryStore for StaticTracker {
    fn get_repository(&self, repository_id: &str) -> TrackerResult<Option<RepositoryRecord>> {
        Ok(self.repositories.get(repository_id).cloned())
    }
}

impl CommitStore for StaticTracker {
    fn latest_commit(&self, repository_id: &str) -> TrackerResult<Option<String>> {
        Ok(self.latest_commits.get(repository_id).cloned())
    }
}
