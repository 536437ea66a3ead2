//! Per-repository versioning policy.
//!
//! A [`RepositoryConfig`] is resolved in three layers, lowest precedence
//! first:
//!
//! 1. built-in maps ([`default_branch_environments`], [`default_issue_types`])
//! 2. workspace-wide [`PolicyDefaults`] (the `[defaults]` config section)
//! 3. the repository's own stored overrides ([`RepositoryRecord`])
//!
//! Map layers merge entry by entry; scalar layers replace. Resolved configs
//! are cached per repository by [`ConfigResolver`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::environment::{
    BranchEnvironmentMap, Environment, default_branch_environments, resolve_environment,
};
use crate::tracker::{RepositoryRecord, RepositoryStore, TrackerError};
use crate::version::BumpLevel;

/// Development branch used when nothing names one.
pub const DEFAULT_DEVELOPMENT_BRANCH: &str = "dev";

/// Errors from policy resolution.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// The repository is unknown to the repository store.
    #[error("no configuration for repository {repository_id}")]
    NotFound {
        /// The requested repository.
        repository_id: String,
    },

    /// The stored policy violates an invariant.
    #[error("invalid policy for repository {repository_id}: {message}")]
    Invalid {
        /// The offending repository.
        repository_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// The repository store failed.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// How a repository lays out its version lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersioningStrategy {
    /// One version line per environment, always bumped with standard SemVer.
    #[serde(alias = "SINGLE_BRANCH")]
    SingleBranch,
    /// Development accumulates; production is promoted from development.
    #[default]
    #[serde(alias = "MULTI_BRANCH")]
    MultiBranch,
}

impl fmt::Display for VersioningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleBranch => write!(f, "single-branch"),
            Self::MultiBranch => write!(f, "multi-branch"),
        }
    }
}

/// Issue type (upper case) to bump severity.
pub type IssueTypeMap = BTreeMap<String, BumpLevel>;

/// The built-in issue type map.
pub fn default_issue_types() -> IssueTypeMap {
    [
        ("BUG", BumpLevel::Patch),
        ("HOTFIX", BumpLevel::Patch),
        ("TASK", BumpLevel::Minor),
        ("STORY", BumpLevel::Minor),
        ("FEATURE", BumpLevel::Minor),
        ("ENHANCEMENT", BumpLevel::Minor),
        ("EPIC", BumpLevel::Major),
        ("BREAKING_CHANGE", BumpLevel::Major),
    ]
    .into_iter()
    .map(|(t, level)| (t.to_string(), level))
    .collect()
}

/// Workspace-wide policy defaults, layered over the built-in maps.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyDefaults {
    /// Strategy for repositories that do not set one.
    pub strategy: Option<VersioningStrategy>,
    /// Development branch for repositories that do not set one.
    pub development_branch: Option<String>,
    /// Extra or replacement branch mappings.
    pub branch_environments: BranchEnvironmentMap,
    /// Extra or replacement issue type mappings.
    pub issue_types: IssueTypeMap,
}

/// Fully resolved policy for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryConfig {
    /// Repository identifier.
    pub repository_id: String,
    /// Version line layout.
    pub strategy: VersioningStrategy,
    /// The accumulation branch.
    pub development_branch: String,
    /// Branch classification.
    pub branch_environments: BranchEnvironmentMap,
    /// Issue type severities, keys upper case.
    pub issue_types: IssueTypeMap,
    /// Issue key prefix (e.g. `PROJ`), if the repository tracks issues.
    pub issue_prefix: Option<String>,
    /// Issue tracker project the keys belong to.
    pub project_id: Option<String>,
}

impl RepositoryConfig {
    /// Classify a branch under this policy.
    pub fn environment_for(&self, branch: &str) -> Environment {
        resolve_environment(branch, &self.branch_environments)
    }
}

/// Merge a repository record over the defaults.
pub fn resolve_repository_config(
    repository_id: &str,
    record: &RepositoryRecord,
    defaults: &PolicyDefaults,
) -> PolicyResult<RepositoryConfig> {
    let strategy = record
        .strategy
        .or(defaults.strategy)
        .unwrap_or_default();

    let development_branch = record
        .development_branch
        .clone()
        .or_else(|| defaults.development_branch.clone())
        .unwrap_or_else(|| DEFAULT_DEVELOPMENT_BRANCH.to_string())
        .trim()
        .to_string();

    if strategy == VersioningStrategy::MultiBranch && development_branch.is_empty() {
        return Err(PolicyError::Invalid {
            repository_id: repository_id.to_string(),
            message: "multi-branch versioning requires a development branch".into(),
        });
    }

    let mut branch_environments = default_branch_environments();
    branch_environments.extend(defaults.branch_environments.clone());
    if let Some(ref overrides) = record.branch_environments {
        branch_environments.extend(overrides.clone());
    }
    if !development_branch.is_empty() {
        branch_environments
            .entry(development_branch.clone())
            .or_insert(Environment::Development);
    }

    let mut issue_types = default_issue_types();
    let overrides = defaults
        .issue_types
        .iter()
        .chain(record.issue_types.iter().flatten());
    for (issue_type, level) in overrides {
        issue_types.insert(issue_type.to_ascii_uppercase(), *level);
    }

    Ok(RepositoryConfig {
        repository_id: repository_id.to_string(),
        strategy,
        development_branch,
        branch_environments,
        issue_types,
        issue_prefix: record
            .issue_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        project_id: record.project_id.clone(),
    })
}

/// Resolves and caches repository policies.
pub struct ConfigResolver {
    repositories: Arc<dyn RepositoryStore>,
    defaults: PolicyDefaults,
    cache: Mutex<HashMap<String, Arc<RepositoryConfig>>>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    /// Create a resolver over a repository store.
    pub fn new(repositories: Arc<dyn RepositoryStore>, defaults: PolicyDefaults) -> Self {
        Self {
            repositories,
            defaults,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the policy for a repository, consulting the cache first.
    #[instrument(skip(self))]
    pub fn resolve(&self, repository_id: &str) -> PolicyResult<Arc<RepositoryConfig>> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository_id)
        {
            return Ok(Arc::clone(cached));
        }

        let record = self
            .repositories
            .get_repository(repository_id)?
            .ok_or_else(|| PolicyError::NotFound {
                repository_id: repository_id.to_string(),
            })?;
        let config = Arc::new(resolve_repository_config(
            repository_id,
            &record,
            &self.defaults,
        )?);
        debug!(
            strategy = %config.strategy,
            development_branch = %config.development_branch,
            "resolved repository policy"
        );

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository_id.to_string(), Arc::clone(&config));
        Ok(config)
    }

    /// Drop a cached policy so the next call re-reads the store.
    pub fn invalidate(&self, repository_id: &str) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(repository_id);
    }
}
