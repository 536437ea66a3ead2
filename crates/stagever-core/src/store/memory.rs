//! In-process version store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::environment::Environment;
use crate::store::{
    NewRelease, NewVersion, ReleaseRecord, StoreError, StoreResult, VersionId, VersionIssue,
    VersionRecord, VersionStatus, VersionStore,
};
use crate::version_file::VersionFileRecord;

#[derive(Debug, Default)]
struct State {
    next_version_id: VersionId,
    next_release_id: i64,
    versions: Vec<VersionRecord>,
    links: Vec<VersionIssue>,
    releases: Vec<ReleaseRecord>,
    version_files: BTreeMap<(String, Environment), VersionFileRecord>,
}

impl State {
    fn version_mut(&mut self, id: VersionId) -> StoreResult<&mut VersionRecord> {
        self.versions
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| not_found(id))
    }
}

/// A [`VersionStore`] held entirely in memory.
///
/// Every operation runs under one lock, so upserts are atomic with respect
/// to each other. Used by tests and by one-shot CLI calculations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(id: VersionId) -> StoreError {
    StoreError::NotFound {
        entity: "version",
        id: id.to_string(),
    }
}

impl VersionStore for MemoryStore {
    fn upsert_version(&self, new: &NewVersion) -> StoreResult<VersionRecord> {
        let mut state = self.lock();
        let now = Utc::now();
        let version = new.version.to_string();

        if let Some(existing) = state.versions.iter_mut().find(|v| {
            v.repository_id == new.repository_id
                && v.environment == new.environment
                && v.version == version
        }) {
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        state.next_version_id += 1;
        let record = VersionRecord {
            id: state.next_version_id,
            repository_id: new.repository_id.clone(),
            version,
            major: new.version.major,
            minor: new.version.minor,
            patch: new.version.patch,
            prerelease: new.prerelease(),
            build_metadata: new.build_metadata(),
            release_type: new.release_type,
            status: new.status,
            environment: new.environment,
            branch: new.branch.clone(),
            is_production: new.environment == Environment::Production,
            parent_version_id: new.parent_version_id,
            changelog: None,
            created_at: now,
            updated_at: now,
            released_at: new.released_at,
        };
        state.versions.push(record.clone());
        Ok(record)
    }

    fn link_issue(&self, version_id: VersionId, issue_id: &str) -> StoreResult<bool> {
        let mut state = self.lock();
        state.version_mut(version_id)?;
        if state
            .links
            .iter()
            .any(|l| l.version_id == version_id && l.issue_id == issue_id)
        {
            return Ok(false);
        }
        state.links.push(VersionIssue {
            version_id,
            issue_id: issue_id.to_string(),
            ai_title: None,
            ai_summary: None,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    fn get_version(&self, version_id: VersionId) -> StoreResult<Option<VersionRecord>> {
        Ok(self
            .lock()
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned())
    }

    fn find_version(
        &self,
        repository_id: &str,
        environment: Environment,
        version: &str,
    ) -> StoreResult<Option<VersionRecord>> {
        Ok(self
            .lock()
            .versions
            .iter()
            .find(|v| {
                v.repository_id == repository_id
                    && v.environment == environment
                    && v.version == version
            })
            .cloned())
    }

    fn latest_version(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionRecord>> {
        Ok(self
            .lock()
            .versions
            .iter()
            .filter(|v| {
                v.repository_id == repository_id
                    && v.environment == environment
                    && v.status.is_live()
            })
            .max_by_key(|v| v.precedence())
            .cloned())
    }

    fn list_versions(
        &self,
        repository_id: &str,
        environment: Option<Environment>,
    ) -> StoreResult<Vec<VersionRecord>> {
        let mut versions: Vec<_> = self
            .lock()
            .versions
            .iter()
            .filter(|v| {
                v.repository_id == repository_id && environment.is_none_or(|e| v.environment == e)
            })
            .cloned()
            .collect();
        versions.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(versions)
    }

    fn linked_issues(&self, version_id: VersionId) -> StoreResult<Vec<VersionIssue>> {
        Ok(self
            .lock()
            .links
            .iter()
            .filter(|l| l.version_id == version_id)
            .cloned()
            .collect())
    }

    fn set_status(
        &self,
        version_id: VersionId,
        status: VersionStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> StoreResult<VersionRecord> {
        let mut state = self.lock();
        let record = state.version_mut(version_id)?;
        record.status = status;
        if released_at.is_some() {
            record.released_at = released_at;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn set_changelog(&self, version_id: VersionId, changelog: &str) -> StoreResult<()> {
        let mut state = self.lock();
        let record = state.version_mut(version_id)?;
        record.changelog = Some(changelog.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    fn annotate_issue(
        &self,
        version_id: VersionId,
        issue_id: &str,
        title: Option<&str>,
        summary: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        let link = state
            .links
            .iter_mut()
            .find(|l| l.version_id == version_id && l.issue_id == issue_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "issue link",
                id: format!("{version_id}/{issue_id}"),
            })?;
        link.ai_title = title.map(str::to_string);
        link.ai_summary = summary.map(str::to_string);
        Ok(())
    }

    fn upsert_release(&self, release: &NewRelease) -> StoreResult<ReleaseRecord> {
        let mut state = self.lock();
        state.version_mut(release.version_id)?;
        let now = Utc::now();

        if let Some(existing) = state
            .releases
            .iter_mut()
            .find(|r| r.repository_id == release.repository_id && r.tag_name == release.tag_name)
        {
            existing.name.clone_from(&release.name);
            existing.body.clone_from(&release.body);
            existing.url.clone_from(&release.url);
            existing.prerelease = release.prerelease;
            existing.published_at = release.published_at;
            existing.version_id = release.version_id;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        state.next_release_id += 1;
        let record = ReleaseRecord {
            id: state.next_release_id,
            repository_id: release.repository_id.clone(),
            tag_name: release.tag_name.clone(),
            name: release.name.clone(),
            body: release.body.clone(),
            url: release.url.clone(),
            prerelease: release.prerelease,
            published_at: release.published_at,
            version_id: release.version_id,
            created_at: now,
            updated_at: now,
        };
        state.releases.push(record.clone());
        Ok(record)
    }

    fn upsert_version_file(&self, record: &VersionFileRecord) -> StoreResult<()> {
        self.lock().version_files.insert(
            (record.repository_id.clone(), record.environment),
            record.clone(),
        );
        Ok(())
    }

    fn version_file(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionFileRecord>> {
        Ok(self
            .lock()
            .version_files
            .get(&(repository_id.to_string(), environment))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn satisfies_store_contract() {
        contract::run_all(|| Box::new(MemoryStore::new()));
    }
}
