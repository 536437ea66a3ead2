//! End-to-end scenarios for the version engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use semver::Version;
use stagever_core::changelog::IssueListChangelog;
use stagever_core::engine::{EngineSettings, MergeInfo, VersionEngine};
use stagever_core::environment::Environment;
use stagever_core::error::EngineError;
use stagever_core::policy::VersioningStrategy;
use stagever_core::release::ReleaseEvent;
use stagever_core::store::{MemoryStore, NewVersion, SqliteStore, VersionStatus, VersionStore};
use stagever_core::tracker::{CommitInfo, Issue, RepositoryRecord, StaticTracker};
use stagever_core::version::{BumpLevel, ReleaseType};

fn issue(id: &str, key: &str, issue_type: &str) -> Issue {
    Issue {
        id: id.into(),
        issue_type: issue_type.into(),
        issue_key: key.into(),
        title: format!("{key} title"),
        description: None,
    }
}

fn tracker(strategy: VersioningStrategy) -> StaticTracker {
    let issue_types = BTreeMap::from([
        ("BUG".to_string(), BumpLevel::Patch),
        ("STORY".to_string(), BumpLevel::Minor),
        ("EPIC".to_string(), BumpLevel::Major),
    ]);
    StaticTracker::default()
        .with_repository(
            "web",
            RepositoryRecord {
                issue_prefix: Some("PROJ".into()),
                project_id: Some("p1".into()),
                strategy: Some(strategy),
                issue_types: Some(issue_types),
                ..RepositoryRecord::default()
            },
        )
        .with_issue("p1", issue("bug-1", "PROJ-1", "BUG"))
        .with_issue("p1", issue("story-2", "PROJ-2", "STORY"))
        .with_issue("p1", issue("bug-3", "PROJ-3", "BUG"))
        .with_issue("p1", issue("epic-4", "PROJ-4", "EPIC"))
        .with_latest_commit("web", "abc123")
}

fn engine_with(
    store: Arc<dyn VersionStore>,
    strategy: VersioningStrategy,
    settings: EngineSettings,
) -> VersionEngine {
    let tracker = Arc::new(tracker(strategy));
    VersionEngine::new(store, tracker.clone(), tracker.clone(), tracker, settings)
}

fn engine() -> (VersionEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::MultiBranch,
        EngineSettings::default(),
    );
    (engine, store)
}

fn commits(messages: &[&str]) -> Vec<CommitInfo> {
    messages.iter().map(|m| CommitInfo::from_message(*m)).collect()
}

fn seed_development(store: &dyn VersionStore, version: Version) {
    store
        .upsert_version(&NewVersion {
            repository_id: "web".into(),
            version,
            release_type: ReleaseType::Patch,
            status: VersionStatus::Pending,
            environment: Environment::Development,
            branch: "dev".into(),
            parent_version_id: None,
            released_at: None,
        })
        .unwrap();
}

#[test]
fn development_merge_accumulates() {
    let (engine, store) = engine();
    seed_development(store.as_ref(), Version::new(0, 2, 1));

    let record = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-1: fix crash", "PROJ-2: add search"]))
        .unwrap()
        .unwrap();

    assert_eq!(record.version, "0.3.1");
    assert_eq!(record.status, VersionStatus::Pending);
    assert_eq!(record.environment, Environment::Development);
    assert_eq!(record.release_type, ReleaseType::Minor);

    let linked: Vec<_> = store
        .linked_issues(record.id)
        .unwrap()
        .into_iter()
        .map(|l| l.issue_id)
        .collect();
    assert_eq!(linked, vec!["bug-1", "story-2"]);
}

#[test]
fn accumulation_trace_across_merges() {
    let (engine, store) = engine();
    seed_development(store.as_ref(), Version::new(0, 2, 1));

    let versions: Vec<String> = ["PROJ-1", "PROJ-3", "PROJ-2"]
        .into_iter()
        .map(|key| {
            engine
                .handle_branch_merge("web", "dev", &commits(&[key]))
                .unwrap()
                .unwrap()
                .version
        })
        .collect();

    assert_eq!(versions, vec!["0.2.2", "0.2.3", "0.3.3"]);
}

#[test]
fn production_merge_without_development_falls_back() {
    let (engine, store) = engine();

    let record = engine
        .handle_branch_merge("web", "main", &commits(&["PROJ-2: add search"]))
        .unwrap()
        .unwrap();

    assert_eq!(record.version, "0.1.0");
    assert_eq!(record.environment, Environment::Production);
    assert!(record.is_production);
    assert!(record.parent_version_id.is_none());
    assert_eq!(
        store.current_version("web", Environment::Production).unwrap(),
        Version::new(0, 1, 0)
    );
}

#[test]
fn production_merge_without_source_can_be_refused() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::MultiBranch,
        EngineSettings {
            require_promotion_source: true,
            ..EngineSettings::default()
        },
    );

    let err = engine
        .handle_branch_merge("web", "main", &commits(&["PROJ-2"]))
        .unwrap_err();
    assert!(matches!(err, EngineError::PromotionSourceMissing { .. }));
    assert!(store.list_versions("web", None).unwrap().is_empty());
}

#[test]
fn production_merge_promotes_development() {
    let (engine, store) = engine();
    let dev = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-1", "PROJ-2"]))
        .unwrap()
        .unwrap();

    let prod = engine
        .handle_branch_merge("web", "main", &commits(&["Merge dev: PROJ-2"]))
        .unwrap()
        .unwrap();

    assert_eq!(prod.version, dev.version);
    assert_eq!(prod.parent_version_id, Some(dev.id));
    assert_eq!(prod.status, VersionStatus::Ready);
    assert!(prod.released_at.is_some());

    let ids = |id| -> Vec<String> {
        store
            .linked_issues(id)
            .unwrap()
            .into_iter()
            .map(|l| l.issue_id)
            .collect()
    };
    assert_eq!(ids(prod.id), ids(dev.id));
}

#[test]
fn single_branch_production_calculates_its_own_numbers() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::SingleBranch,
        EngineSettings::default(),
    );
    engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-2"]))
        .unwrap();
    let prod = engine
        .handle_branch_merge("web", "main", &commits(&["PROJ-1"]))
        .unwrap()
        .unwrap();
    assert_eq!(prod.version, "0.0.1");
    assert!(prod.parent_version_id.is_none());

    // single-branch development also uses standard increments
    let dev = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-1"]))
        .unwrap()
        .unwrap();
    assert_eq!(dev.version, "0.1.1");
    let dev = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-2"]))
        .unwrap()
        .unwrap();
    assert_eq!(dev.version, "0.2.0");
}

#[test]
fn major_issue_dominates() {
    let (engine, _store) = engine();
    let record = engine
        .handle_branch_merge("web", "feature/x", &commits(&["PROJ-1", "PROJ-4", "PROJ-2"]))
        .unwrap()
        .unwrap();
    assert_eq!(record.version, "1.0.0");
    assert_eq!(record.release_type, ReleaseType::Major);
}

#[test]
fn merge_without_issues_is_a_no_op() {
    let (engine, store) = engine();
    let result = engine
        .handle_branch_merge("web", "dev", &commits(&["chore: bump deps", "PROJ-999 unknown"]))
        .unwrap();
    assert!(result.is_none());
    assert!(store.list_versions("web", None).unwrap().is_empty());
}

#[test]
fn unknown_repository_is_config_not_found() {
    let (engine, _store) = engine();
    let err = engine
        .handle_branch_merge("nope", "dev", &commits(&["PROJ-1"]))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ConfigNotFound { ref repository_id } if repository_id == "nope"
    ));
}

#[test]
fn staging_branch_uses_standard_increments() {
    let (engine, _store) = engine();
    let first = engine
        .handle_branch_merge("web", "staging", &commits(&["PROJ-2"]))
        .unwrap()
        .unwrap();
    let second = engine
        .handle_branch_merge("web", "staging", &commits(&["PROJ-1"]))
        .unwrap()
        .unwrap();
    assert_eq!(first.environment, Environment::Staging);
    assert_eq!(first.version, "0.1.0");
    assert_eq!(second.version, "0.1.1");
}

#[test]
fn pull_request_scans_title_and_body() {
    let (engine, store) = engine();
    let merge = MergeInfo {
        merged: true,
        base_branch: "dev".into(),
        head_branch: Some("feature/search".into()),
        title: "PROJ-2: search".into(),
        body: Some("Also fixes PROJ-1".into()),
        commits: commits(&["wip", "more wip"]),
    };

    let record = engine
        .handle_pull_request_merge("web", 42, &merge)
        .unwrap()
        .unwrap();
    assert_eq!(record.version, "0.1.0");
    assert_eq!(record.branch, "dev");
    assert_eq!(store.linked_issues(record.id).unwrap().len(), 2);
}

#[test]
fn unmerged_pull_request_is_ignored() {
    let (engine, store) = engine();
    let merge = MergeInfo {
        merged: false,
        base_branch: "dev".into(),
        title: "PROJ-2".into(),
        ..MergeInfo::default()
    };
    assert!(engine.handle_pull_request_merge("web", 7, &merge).unwrap().is_none());
    assert!(store.list_versions("web", None).unwrap().is_empty());
}

#[test]
fn release_import_through_engine() {
    let (engine, store) = engine();
    let event = ReleaseEvent {
        prerelease: true,
        ..ReleaseEvent::published("v2.3.1-rc.1")
    };
    let imported = engine.handle_github_release("web", &event).unwrap().unwrap();
    assert_eq!(imported.version.environment, Environment::Staging);
    assert_eq!(imported.version.prerelease.as_deref(), Some("rc.1"));

    let file = store.version_file("web", Environment::Staging).unwrap().unwrap();
    assert_eq!(file.version, "2.3.1-rc.1");
    assert_eq!(file.commit.as_deref(), Some("abc123"));
}

#[test]
fn invalid_release_tag_is_rejected() {
    let (engine, _store) = engine();
    let err = engine
        .handle_github_release("web", &ReleaseEvent::published("nightly"))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidVersionFormat { .. }));
}

#[test]
fn enrichment_writes_changelog_and_version_file() {
    let dir = tempfile::tempdir().unwrap();
    let export = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::MultiBranch,
        EngineSettings {
            export_dir: Some(export.clone()),
            ..EngineSettings::default()
        },
    )
    .with_changelog(Arc::new(IssueListChangelog));

    let record = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-1", "PROJ-2"]))
        .unwrap()
        .unwrap();

    let stored = store.get_version(record.id).unwrap().unwrap();
    let changelog = stored.changelog.unwrap();
    assert!(changelog.contains("PROJ-2: PROJ-2 title"));
    let links = store.linked_issues(record.id).unwrap();
    assert!(links.iter().all(|l| l.ai_title.is_some()));

    let file = store
        .version_file("web", Environment::Development)
        .unwrap()
        .unwrap();
    assert_eq!(file.features, vec!["PROJ-2"]);
    assert_eq!(file.bugfixes, vec!["PROJ-1"]);

    let exported = export.join("web/development/version.json");
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(exported).unwrap()).unwrap();
    assert_eq!(json["version"], "0.1.0");
    assert_eq!(json["commit"], "abc123");
}

#[test]
fn failed_export_does_not_fail_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::MultiBranch,
        EngineSettings {
            export_dir: Some(Utf8Path::from_path(&blocker).unwrap().to_path_buf()),
            ..EngineSettings::default()
        },
    );

    let record = engine
        .handle_branch_merge("web", "dev", &commits(&["PROJ-1"]))
        .unwrap();
    assert!(record.is_some());
    assert_eq!(store.list_versions("web", None).unwrap().len(), 1);
}

#[test]
fn sqlite_backed_engine_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8Path::from_path(dir.path()).unwrap().join("stagever.db");

    {
        let store: Arc<dyn VersionStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let engine = engine_with(store, VersioningStrategy::MultiBranch, EngineSettings::default());
        engine
            .handle_branch_merge("web", "dev", &commits(&["PROJ-2"]))
            .unwrap();
        engine
            .handle_branch_merge("web", "dev", &commits(&["PROJ-1"]))
            .unwrap();
    }

    let store: Arc<dyn VersionStore> = Arc::new(SqliteStore::open(&path).unwrap());
    assert_eq!(
        store.current_version("web", Environment::Development).unwrap(),
        Version::new(0, 1, 1)
    );
    let engine = engine_with(
        store.clone(),
        VersioningStrategy::MultiBranch,
        EngineSettings::default(),
    );
    let prod = engine
        .handle_branch_merge("web", "main", &commits(&["PROJ-1"]))
        .unwrap()
        .unwrap();
    assert_eq!(prod.version, "0.1.1");
    assert!(prod.parent_version_id.is_some());
}

#[test]
fn redelivered_merge_does_not_bump_again() {
    let (engine, store) = engine();
    let delivery = vec![CommitInfo {
        sha: "abc".into(),
        message: "PROJ-1: fix crash".into(),
        author: "kim".into(),
    }];

    let first = engine
        .handle_branch_merge("web", "dev", &delivery)
        .unwrap()
        .unwrap();
    let second = engine
        .handle_branch_merge("web", "dev", &delivery)
        .unwrap()
        .unwrap();

    assert_eq!(first.version, "0.0.1");
    assert_eq!(second.id, first.id);
    assert_eq!(second.version, first.version);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(store.list_versions("web", None).unwrap().len(), 1);
    assert_eq!(store.linked_issues(first.id).unwrap().len(), 1);
}

#[test]
fn redelivered_pull_request_does_not_bump_again() {
    let (engine, store) = engine();
    let merge = MergeInfo {
        merged: true,
        base_branch: "staging".into(),
        title: "PROJ-2: add search".into(),
        ..MergeInfo::default()
    };

    let first = engine.handle_pull_request_merge("web", 9, &merge).unwrap().unwrap();
    let second = engine.handle_pull_request_merge("web", 9, &merge).unwrap().unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(
        store.current_version("web", Environment::Staging).unwrap(),
        Version::new(0, 1, 0)
    );
}

#[test]
fn redelivered_production_fallback_does_not_bump_again() {
    let (engine, store) = engine();
    for _ in 0..2 {
        let record = engine
            .handle_branch_merge("web", "main", &commits(&["PROJ-2"]))
            .unwrap()
            .unwrap();
        assert_eq!(record.version, "0.1.0");
    }
    assert_eq!(store.list_versions("web", Some(Environment::Production)).unwrap().len(), 1);
}

#[test]
fn same_issues_after_another_merge_bump_again() {
    let (engine, _store) = engine();
    let versions: Vec<String> = ["PROJ-1", "PROJ-3", "PROJ-1"]
        .into_iter()
        .map(|key| {
            engine
                .handle_branch_merge("web", "dev", &commits(&[key]))
                .unwrap()
                .unwrap()
                .version
        })
        .collect();
    assert_eq!(versions, vec!["0.0.1", "0.0.2", "0.0.3"]);
}

#[test]
fn concurrent_redeliveries_yield_one_version() {
    let (engine, store) = engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine
                    .handle_branch_merge("web", "dev", &commits(&["PROJ-1"]))
                    .unwrap()
                    .unwrap()
                    .version
            })
        })
        .collect();
    let versions: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(versions.iter().all(|v| v == "0.0.1"), "{versions:?}");
    assert_eq!(store.list_versions("web", None).unwrap().len(), 1);
}

#[test]
fn concurrent_distinct_merges_serialize() {
    let (engine, store) = engine();
    let engine = Arc::new(engine);

    let deliveries: [&[&str]; 3] = [&["PROJ-1"], &["PROJ-3"], &["PROJ-1", "PROJ-3"]];
    let handles: Vec<_> = deliveries
        .into_iter()
        .map(|keys| {
            let engine = Arc::clone(&engine);
            let delivery = commits(keys);
            std::thread::spawn(move || {
                engine
                    .handle_branch_merge("web", "dev", &delivery)
                    .unwrap()
                    .unwrap()
                    .version
            })
        })
        .collect();
    let mut versions: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    versions.sort();
    versions.dedup();

    assert_eq!(versions.len(), 3);
    assert_eq!(
        store.current_version("web", Environment::Development).unwrap(),
        Version::new(0, 0, 3)
    );
}
