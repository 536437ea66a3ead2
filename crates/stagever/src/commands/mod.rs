//! Command implementations

pub mod calc;

pub mod current;

pub mod doctor;

pub mod info;

pub mod merge;

pub mod pr;

pub mod release;

use std::sync::Arc;

use anyhow::Context;
use owo_colors::OwoColorize;
use stagever_core::changelog::IssueListChangelog;
use stagever_core::config::Config;
use stagever_core::engine::VersionEngine;
use stagever_core::store::{SqliteStore, VersionRecord, VersionStatus};
use stagever_core::tracker::StaticTracker;
use tracing::debug;

/// Load the tracker snapshot named by the configuration.
///
/// Repositories declared in the configuration are added unless the
/// snapshot already describes them.
pub fn load_tracker(config: &Config) -> anyhow::Result<StaticTracker> {
    let tracker = match config.tracker_file {
        Some(ref path) => StaticTracker::from_snapshot_file(path)
            .with_context(|| format!("failed to load tracker snapshot {path}"))?,
        None => StaticTracker::default(),
    };
    Ok(tracker.with_default_repositories(config.repositories.clone()))
}

/// Open the configured database.
pub fn open_store(config: &Config) -> anyhow::Result<SqliteStore> {
    let path = config
        .database_path()
        .context("no database path: set `database` in the configuration")?;
    debug!(%path, "opening version database");
    SqliteStore::open(&path).with_context(|| format!("failed to open database {path}"))
}

/// Wire an engine over the configured database and tracker snapshot.
pub fn build_engine(config: &Config) -> anyhow::Result<VersionEngine> {
    let store = Arc::new(open_store(config)?);
    let tracker = Arc::new(load_tracker(config)?);
    Ok(VersionEngine::new(
        store,
        tracker.clone(),
        tracker.clone(),
        tracker,
        config.engine_settings(),
    )
    .with_changelog(Arc::new(IssueListChangelog)))
}

/// Print the outcome of a merge: the version, or a note that nothing changed.
pub fn print_version(record: Option<&VersionRecord>, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    match record {
        Some(record) => print_version_line(record),
        None => println!(
            "  {} {}",
            "○".yellow(),
            "No issues referenced; no version created".yellow()
        ),
    }
    Ok(())
}

/// One line per version: number, environment, status, and origin branch.
pub fn print_version_line(record: &VersionRecord) {
    let status = match record.status {
        VersionStatus::Released | VersionStatus::Ready => {
            record.status.as_str().green().to_string()
        }
        VersionStatus::Pending => record.status.as_str().yellow().to_string(),
        VersionStatus::Failed | VersionStatus::Cancelled => {
            record.status.as_str().red().to_string()
        }
    };
    println!(
        "  {} {} {} ({}, {})",
        "✓".green(),
        record.version.bold(),
        record.environment.to_string().cyan(),
        status,
        record.branch.dimmed()
    );
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Fixtures shared by command tests.

    use std::collections::BTreeMap;

    use camino::Utf8PathBuf;
    use stagever_core::config::Config;
    use stagever_core::tracker::RepositoryRecord;

    const SNAPSHOT: &str = r#"{
        "projects": {
            "proj-1": [
                {"id": "1", "type": "BUG", "issue_key": "PROJ-1", "title": "Login fails"},
                {"id": "2", "type": "STORY", "issue_key": "PROJ-2", "title": "Dark mode"}
            ]
        },
        "latest_commits": {"web": "abc123"}
    }"#;

    /// A configuration with a fresh database and a small tracker snapshot.
    pub fn workspace() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let tracker_file = root.join("tracker.json");
        std::fs::write(&tracker_file, SNAPSHOT).unwrap();

        let config = Config {
            database: Some(root.join("stagever.db")),
            tracker_file: Some(tracker_file),
            export_dir: Some(root.join("versions")),
            repositories: BTreeMap::from([(
                "web".to_string(),
                RepositoryRecord {
                    issue_prefix: Some("PROJ".into()),
                    project_id: Some("proj-1".into()),
                    ..RepositoryRecord::default()
                },
            )]),
            ..Config::default()
        };
        (dir, config)
    }
}
