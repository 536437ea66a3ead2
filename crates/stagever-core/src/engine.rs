//! Event handlers tying policy, calculation, promotion, and storage together.
//!
//! [`VersionEngine`] is the entry point for the three events stagever reacts
//! to: a branch merge, a pull request merge, and a published release. Each
//! call is an independent unit of work against injected collaborators.
//!
//! A merge runs as:
//!
//! 1. resolve the repository's policy and classify the target branch
//! 2. extract issue references and reduce them to a bump
//! 3. promote (multi-branch production) or calculate and upsert; a line
//!    whose head already ships the same issues is only touched, so a
//!    redelivered event never bumps twice
//! 4. enrich the committed version with a changelog and version file
//!
//! Step 4 is best-effort. Its failures are logged and never undo step 3.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::changelog::ChangelogGenerator;
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::policy::{ConfigResolver, PolicyDefaults, RepositoryConfig, VersioningStrategy};
use crate::promotion::promote;
use crate::release::{ImportedRelease, ReleaseEvent, import_release};
use crate::store::{NewVersion, VersionRecord, VersionStore};
use crate::tracker::extract::extract_issue_ids;
use crate::tracker::{CommitInfo, CommitStore, Issue, IssueStore, RepositoryStore};
use crate::version::BumpLevel;
use crate::version::calculate::{calculate, calculation_mode};
use crate::version::determine::determine_bump;
use crate::version_file::{VersionFileRecord, export_version_file};

/// Engine-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Policy defaults layered under every repository record.
    pub defaults: PolicyDefaults,
    /// Fail production merges that have no development version to promote.
    pub require_promotion_source: bool,
    /// Root directory for exported version files.
    pub export_dir: Option<Utf8PathBuf>,
}

/// A merged pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeInfo {
    /// Whether the pull request was merged (rather than closed).
    pub merged: bool,
    /// Branch the pull request merged into.
    pub base_branch: String,
    /// Branch the pull request came from.
    pub head_branch: Option<String>,
    /// Pull request title.
    pub title: String,
    /// Pull request description.
    pub body: Option<String>,
    /// Commits in the pull request.
    pub commits: Vec<CommitInfo>,
}

type LockKey = (String, Environment);

/// One mutex per `(repository, environment)` version line.
#[derive(Debug, Default)]
struct LineLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LineLocks {
    fn get(&self, repository_id: &str, environment: Environment) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry((repository_id.to_string(), environment))
                .or_default(),
        )
    }
}

/// Reacts to merge and release events.
pub struct VersionEngine {
    resolver: ConfigResolver,
    issues: Arc<dyn IssueStore>,
    commits: Arc<dyn CommitStore>,
    store: Arc<dyn VersionStore>,
    changelog: Option<Arc<dyn ChangelogGenerator>>,
    settings: EngineSettings,
    locks: LineLocks,
}

impl std::fmt::Debug for VersionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionEngine")
            .field("settings", &self.settings)
            .field("changelog", &self.changelog.is_some())
            .finish_non_exhaustive()
    }
}

impl VersionEngine {
    /// Create an engine over its collaborators.
    pub fn new(
        store: Arc<dyn VersionStore>,
        issues: Arc<dyn IssueStore>,
        repositories: Arc<dyn RepositoryStore>,
        commits: Arc<dyn CommitStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            resolver: ConfigResolver::new(repositories, settings.defaults.clone()),
            issues,
            commits,
            store,
            changelog: None,
            settings,
            locks: LineLocks::default(),
        }
    }

    /// Generate changelogs for new versions.
    pub fn with_changelog(mut self, generator: Arc<dyn ChangelogGenerator>) -> Self {
        self.changelog = Some(generator);
        self
    }

    /// The version store.
    pub fn store(&self) -> &dyn VersionStore {
        self.store.as_ref()
    }

    /// The resolved policy of a repository.
    pub fn repository_config(&self, repository_id: &str) -> EngineResult<Arc<RepositoryConfig>> {
        Ok(self.resolver.resolve(repository_id)?)
    }

    /// Handle commits merged into `target_branch`.
    ///
    /// Returns `None` when the commits reference no known issue.
    #[instrument(skip(self, commits), fields(commits = commits.len()))]
    pub fn handle_branch_merge(
        &self,
        repository_id: &str,
        target_branch: &str,
        commits: &[CommitInfo],
    ) -> EngineResult<Option<VersionRecord>> {
        self.process_merge(
            repository_id,
            target_branch,
            commits.iter().map(|c| c.message.as_str()),
        )
    }

    /// Handle a closed pull request.
    ///
    /// Unmerged pull requests are ignored. The title and body are scanned
    /// for issue references along with the commit messages, and the base
    /// branch is the merge target.
    #[instrument(skip(self, merge), fields(base = %merge.base_branch, merged = merge.merged))]
    pub fn handle_pull_request_merge(
        &self,
        repository_id: &str,
        pr_number: u64,
        merge: &MergeInfo,
    ) -> EngineResult<Option<VersionRecord>> {
        if !merge.merged {
            debug!("pull request closed without merging");
            return Ok(None);
        }
        let messages = std::iter::once(merge.title.as_str())
            .chain(merge.body.as_deref())
            .chain(merge.commits.iter().map(|c| c.message.as_str()));
        self.process_merge(repository_id, &merge.base_branch, messages)
    }

    /// Handle a published release.
    #[instrument(skip(self, event), fields(tag = %event.tag_name))]
    pub fn handle_github_release(
        &self,
        repository_id: &str,
        event: &ReleaseEvent,
    ) -> EngineResult<Option<ImportedRelease>> {
        let imported = {
            let lock = self.locks.get(repository_id, event.environment());
            let _line = lock.lock().unwrap_or_else(PoisonError::into_inner);
            import_release(self.store.as_ref(), repository_id, event)?
        };
        if let Some(ref imported) = imported {
            self.write_version_file(&imported.version);
        }
        Ok(imported)
    }

    fn process_merge<'a>(
        &self,
        repository_id: &str,
        branch: &str,
        messages: impl IntoIterator<Item = &'a str>,
    ) -> EngineResult<Option<VersionRecord>> {
        let config = self.resolver.resolve(repository_id)?;
        let environment = config.environment_for(branch);

        let issue_ids = extract_issue_ids(&config, messages, self.issues.as_ref())?;
        if issue_ids.is_empty() {
            info!(%environment, "no issues referenced, nothing to version");
            return Ok(None);
        }
        let issues = self.issues.find_issues_by_ids(&issue_ids)?;
        let Some(bump) = determine_bump(&issues, &config.issue_types) else {
            info!(%environment, "referenced issues not found, nothing to version");
            return Ok(None);
        };

        let record = {
            let lock = self.locks.get(repository_id, environment);
            let _line = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if config.strategy == VersioningStrategy::MultiBranch
                && environment == Environment::Production
            {
                self.promote_or_fallback(&config, branch, bump, &issues)?
            } else {
                self.calculate_and_store(&config, environment, branch, bump, &issues)?
            }
        };

        self.enrich(&record);
        Ok(Some(record))
    }

    fn promote_or_fallback(
        &self,
        config: &RepositoryConfig,
        branch: &str,
        bump: BumpLevel,
        issues: &[Issue],
    ) -> EngineResult<VersionRecord> {
        if let Some(promotion) = promote(self.store.as_ref(), &config.repository_id, branch)? {
            return Ok(promotion.target);
        }
        if self.settings.require_promotion_source {
            return Err(EngineError::PromotionSourceMissing {
                repository_id: config.repository_id.clone(),
            });
        }
        warn!(
            repository = %config.repository_id,
            "no development version to promote, calculating from production history"
        );
        self.calculate_and_store(config, Environment::Production, branch, bump, issues)
    }

    fn calculate_and_store(
        &self,
        config: &RepositoryConfig,
        environment: Environment,
        branch: &str,
        bump: BumpLevel,
        issues: &[Issue],
    ) -> EngineResult<VersionRecord> {
        if let Some(head) = self.already_versioned(&config.repository_id, environment, issues)? {
            info!(
                version = %head.version,
                %environment,
                "merge already versioned, not bumping again"
            );
            return Ok(head);
        }
        let current = self
            .store
            .current_version(&config.repository_id, environment)?;
        let mode = calculation_mode(config.strategy, environment);
        let calc = calculate(&current, bump, mode)?;
        let record = self.store.upsert_version(&NewVersion::pending(
            &config.repository_id,
            branch,
            environment,
            &calc,
        ))?;
        for issue in issues {
            self.store.link_issue(record.id, &issue.id)?;
        }
        info!(
            %current,
            version = %record.version,
            %bump,
            ?mode,
            %environment,
            "calculated version"
        );
        Ok(record)
    }

    /// The live head of a line when it already ships exactly `issues`.
    ///
    /// A redelivered merge resolves to the same issue set as the version it
    /// produced, so it only refreshes that row's bookkeeping.
    fn already_versioned(
        &self,
        repository_id: &str,
        environment: Environment,
        issues: &[Issue],
    ) -> EngineResult<Option<VersionRecord>> {
        let Some(head) = self.store.latest_version(repository_id, environment)? else {
            return Ok(None);
        };
        let linked: BTreeSet<String> = self
            .store
            .linked_issues(head.id)?
            .into_iter()
            .map(|link| link.issue_id)
            .collect();
        let incoming: BTreeSet<String> = issues.iter().map(|issue| issue.id.clone()).collect();
        if linked != incoming {
            return Ok(None);
        }
        let touched = self.store.upsert_version(&NewVersion {
            repository_id: head.repository_id.clone(),
            version: head.semver()?,
            release_type: head.release_type,
            status: head.status,
            environment: head.environment,
            branch: head.branch.clone(),
            parent_version_id: head.parent_version_id,
            released_at: head.released_at,
        })?;
        Ok(Some(touched))
    }

    fn linked_issue_details(&self, record: &VersionRecord) -> EngineResult<Vec<Issue>> {
        let ids: Vec<String> = self
            .store
            .linked_issues(record.id)?
            .into_iter()
            .map(|link| link.issue_id)
            .collect();
        Ok(self.issues.find_issues_by_ids(&ids)?)
    }

    fn enrich(&self, record: &VersionRecord) {
        self.write_changelog(record);
        self.write_version_file(record);
    }

    fn write_changelog(&self, record: &VersionRecord) {
        let Some(ref generator) = self.changelog else {
            return;
        };
        let issues = match self.linked_issue_details(record) {
            Ok(issues) => issues,
            Err(e) => {
                warn!(
                    version = %record.version,
                    error = %e,
                    "changelog skipped, issue lookup failed"
                );
                return;
            }
        };
        let changelog = match generator.generate(&record.version, &issues) {
            Ok(changelog) => changelog,
            Err(e) => {
                warn!(version = %record.version, error = %e, "changelog generation failed");
                return;
            }
        };
        let stored = self
            .store
            .set_changelog(record.id, &changelog.text)
            .and_then(|()| {
                changelog.issues.iter().try_for_each(|summary| {
                    self.store.annotate_issue(
                        record.id,
                        &summary.issue_id,
                        summary.title.as_deref(),
                        summary.summary.as_deref(),
                    )
                })
            });
        match stored {
            Ok(()) => debug!(version = %record.version, "stored changelog"),
            Err(e) => warn!(version = %record.version, error = %e, "changelog could not be stored"),
        }
    }

    fn write_version_file(&self, record: &VersionRecord) {
        let result = self.linked_issue_details(record).and_then(|issues| {
            let commit = self.commits.latest_commit(&record.repository_id)?;
            let file = VersionFileRecord::new(
                &record.repository_id,
                record.environment,
                &record.version,
                &issues,
                commit,
            );
            self.store.upsert_version_file(&file)?;
            Ok(file)
        });
        let file = match result {
            Ok(file) => file,
            Err(e) => {
                warn!(version = %record.version, error = %e, "version file update failed");
                return;
            }
        };
        if let Some(ref dir) = self.settings.export_dir
            && let Err(e) = export_version_file(&file, dir)
        {
            warn!(version = %record.version, error = %e, "version file export failed");
        }
    }
}
