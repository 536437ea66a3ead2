//! Import of externally published releases.
//!
//! A published release names a version by its tag. Importing it records
//! the version in the matching environment (staging for prereleases,
//! production otherwise) and stores the release metadata next to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::store::{
    NewRelease, NewVersion, ReleaseRecord, VersionRecord, VersionStatus, VersionStore,
};
use crate::version::{ReleaseType, parse_version};

/// A release as published by the hosting service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseEvent {
    /// Tag, e.g. `v2.3.1-rc.1`.
    pub tag_name: String,
    /// Release title.
    pub name: Option<String>,
    /// Release notes.
    pub body: Option<String>,
    /// Web URL.
    #[serde(alias = "html_url")]
    pub url: Option<String>,
    /// Marked as a prerelease upstream.
    pub prerelease: bool,
    /// Unpublished draft.
    pub draft: bool,
    /// Branch or commit the tag points at.
    pub target_commitish: Option<String>,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
}

impl ReleaseEvent {
    /// A published, non-draft release for a tag.
    pub fn published(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            ..Self::default()
        }
    }

    /// The environment this release belongs to.
    pub const fn environment(&self) -> Environment {
        if self.prerelease {
            Environment::Staging
        } else {
            Environment::Production
        }
    }
}

/// The result of importing a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedRelease {
    /// The version row, created or updated.
    pub version: VersionRecord,
    /// The stored release metadata.
    pub release: ReleaseRecord,
    /// Whether the version row was created by this import.
    pub created: bool,
}

/// Record a published release.
///
/// Drafts are ignored. A tag that is not a semantic version fails with
/// [`EngineError::InvalidVersionFormat`] before anything is written.
#[instrument(skip(store, event), fields(tag = %event.tag_name))]
pub fn import_release(
    store: &dyn VersionStore,
    repository_id: &str,
    event: &ReleaseEvent,
) -> EngineResult<Option<ImportedRelease>> {
    if event.draft {
        debug!("ignoring draft release");
        return Ok(None);
    }

    let version = parse_version(&event.tag_name).map_err(|source| {
        error!(error = %source, "release tag is not a semantic version");
        EngineError::InvalidVersionFormat {
            tag: event.tag_name.clone(),
            source,
        }
    })?;
    let version_str = version.to_string();
    let environment = event.environment();
    let released_at = event.published_at.unwrap_or_else(Utc::now);

    let (record, created) = match store.find_version(repository_id, environment, &version_str)? {
        Some(existing) => {
            let updated =
                store.set_status(existing.id, VersionStatus::Released, Some(released_at))?;
            (updated, false)
        }
        None => {
            let parent = store
                .find_version(repository_id, Environment::Development, &version_str)?
                .map(|v| v.id);
            let created = store.upsert_version(&NewVersion {
                repository_id: repository_id.to_string(),
                release_type: ReleaseType::infer(&version),
                version,
                status: VersionStatus::Released,
                environment,
                branch: event
                    .target_commitish
                    .clone()
                    .unwrap_or_else(|| event.tag_name.clone()),
                parent_version_id: parent,
                released_at: Some(released_at),
            })?;
            (created, true)
        }
    };

    let release = store.upsert_release(&NewRelease {
        repository_id: repository_id.to_string(),
        tag_name: event.tag_name.clone(),
        name: event.name.clone(),
        body: event.body.clone(),
        url: event.url.clone(),
        prerelease: event.prerelease,
        published_at: event.published_at,
        version_id: record.id,
    })?;

    info!(
        version = %record.version,
        %environment,
        created,
        "imported release"
    );
    Ok(Some(ImportedRelease {
        version: record,
        release,
        created,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use semver::Version;

    #[test]
    fn prerelease_tag_lands_in_staging() {
        let store = MemoryStore::new();
        let event = ReleaseEvent {
            prerelease: true,
            ..ReleaseEvent::published("v2.3.1-rc.1")
        };
        let imported = import_release(&store, "web", &event).unwrap().unwrap();
        let v = &imported.version;

        assert!(imported.created);
        assert_eq!(v.version, "2.3.1-rc.1");
        assert_eq!((v.major, v.minor, v.patch), (2, 3, 1));
        assert_eq!(v.prerelease.as_deref(), Some("rc.1"));
        assert_eq!(v.environment, Environment::Staging);
        assert_eq!(v.release_type, ReleaseType::Prerelease);
        assert_eq!(v.status, VersionStatus::Released);
        assert_eq!(imported.release.tag_name, "v2.3.1-rc.1");
        assert!(imported.release.prerelease);
    }

    #[test]
    fn stable_tag_lands_in_production_with_inferred_type() {
        let store = MemoryStore::new();
        let imported = import_release(&store, "web", &ReleaseEvent::published("1.4.0"))
            .unwrap()
            .unwrap();
        assert_eq!(imported.version.environment, Environment::Production);
        assert!(imported.version.is_production);
        assert_eq!(imported.version.release_type, ReleaseType::Minor);
    }

    #[test]
    fn existing_version_is_marked_released() {
        let store = MemoryStore::new();
        let pending = store
            .upsert_version(&NewVersion {
                repository_id: "web".into(),
                version: Version::new(1, 4, 0),
                release_type: ReleaseType::Minor,
                status: VersionStatus::Ready,
                environment: Environment::Production,
                branch: "main".into(),
                parent_version_id: None,
                released_at: None,
            })
            .unwrap();

        let imported = import_release(&store, "web", &ReleaseEvent::published("v1.4.0"))
            .unwrap()
            .unwrap();
        assert!(!imported.created);
        assert_eq!(imported.version.id, pending.id);
        assert_eq!(imported.version.status, VersionStatus::Released);
        assert!(imported.version.released_at.is_some());
    }

    #[test]
    fn new_row_is_parented_to_development_twin() {
        let store = MemoryStore::new();
        let dev = store
            .upsert_version(&NewVersion {
                repository_id: "web".into(),
                version: Version::new(0, 3, 1),
                release_type: ReleaseType::Minor,
                status: VersionStatus::Pending,
                environment: Environment::Development,
                branch: "dev".into(),
                parent_version_id: None,
                released_at: None,
            })
            .unwrap();
        let imported = import_release(&store, "web", &ReleaseEvent::published("v0.3.1"))
            .unwrap()
            .unwrap();
        assert_eq!(imported.version.parent_version_id, Some(dev.id));
    }

    #[test]
    fn drafts_are_ignored() {
        let store = MemoryStore::new();
        let event = ReleaseEvent {
            draft: true,
            ..ReleaseEvent::published("v1.0.0")
        };
        assert!(import_release(&store, "web", &event).unwrap().is_none());
        assert!(store.list_versions("web", None).unwrap().is_empty());
    }

    #[test]
    fn bad_tag_writes_nothing() {
        let store = MemoryStore::new();
        let err = import_release(&store, "web", &ReleaseEvent::published("release-2024"))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidVersionFormat { ref tag, .. } if tag == "release-2024"
        ));
        assert!(store.list_versions("web", None).unwrap().is_empty());
    }

    #[test]
    fn reimport_updates_release_metadata() {
        let store = MemoryStore::new();
        let first = import_release(&store, "web", &ReleaseEvent::published("v1.0.0"))
            .unwrap()
            .unwrap();
        let renamed = ReleaseEvent {
            name: Some("One point oh".into()),
            ..ReleaseEvent::published("v1.0.0")
        };
        let second = import_release(&store, "web", &renamed).unwrap().unwrap();
        assert_eq!(first.release.id, second.release.id);
        assert_eq!(first.version.id, second.version.id);
        assert_eq!(second.release.name.as_deref(), Some("One point oh"));
    }
}
