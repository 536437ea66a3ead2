//! Promotion of development versions to production.
//!
//! Under multi-branch versioning, production never computes its own
//! numbers. A merge into a production branch takes the current development
//! version, copies it into the production line verbatim, parents it to the
//! source, and carries the source's issue links over.

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::environment::Environment;
use crate::store::{NewVersion, StoreResult, VersionRecord, VersionStatus, VersionStore};

/// A completed promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// The development version that was promoted.
    pub source: VersionRecord,
    /// The production version created (or found) for it.
    pub target: VersionRecord,
    /// Issue links newly copied onto the target.
    pub linked: usize,
}

/// Promote the current development version of a repository.
///
/// Returns `None` when development has no live version. Repeating a
/// promotion finds the existing production row and links nothing new.
#[instrument(skip(store))]
pub fn promote(
    store: &dyn VersionStore,
    repository_id: &str,
    branch: &str,
) -> StoreResult<Option<Promotion>> {
    let Some(source) = store.latest_version(repository_id, Environment::Development)? else {
        debug!("no development version to promote");
        return Ok(None);
    };

    let target = store.upsert_version(&NewVersion {
        repository_id: repository_id.to_string(),
        version: source.semver()?,
        release_type: source.release_type,
        status: VersionStatus::Ready,
        environment: Environment::Production,
        branch: branch.to_string(),
        parent_version_id: Some(source.id),
        released_at: Some(Utc::now()),
    })?;

    let mut linked = 0;
    for link in store.linked_issues(source.id)? {
        if store.link_issue(target.id, &link.issue_id)? {
            linked += 1;
        }
    }

    info!(
        version = %target.version,
        source_id = source.id,
        target_id = target.id,
        linked,
        "promoted development version to production"
    );
    Ok(Some(Promotion {
        source,
        target,
        linked,
    }))
}
