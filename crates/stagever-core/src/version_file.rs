//! The `version.json` artifact deployed alongside each environment.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::environment::Environment;
use crate::tracker::Issue;

/// Issue types listed under `features`.
pub const FEATURE_TYPES: &[&str] = &["TASK", "STORY", "EPIC"];

/// Issue types listed under `bugfixes`.
pub const BUGFIX_TYPES: &[&str] = &["BUG"];

/// File name of the exported artifact.
pub const VERSION_FILE_NAME: &str = "version.json";

/// Errors writing a version file to disk.
#[derive(Error, Debug)]
pub enum VersionFileError {
    /// Filesystem failure.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Path being written.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization failure.
    #[error("failed to encode version file: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias for version file operations.
pub type VersionFileResult<T> = Result<T, VersionFileError>;

/// What is deployed where: one record per `(repository, environment)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionFileRecord {
    /// Owning repository.
    pub repository_id: String,
    /// Environment the file describes.
    pub environment: Environment,
    /// Version string.
    pub version: String,
    /// When the file was generated.
    pub build_time: DateTime<Utc>,
    /// Keys of feature issues shipped in this version.
    pub features: Vec<String>,
    /// Keys of bug issues fixed in this version.
    pub bugfixes: Vec<String>,
    /// Latest commit hash of the repository, if known.
    pub commit: Option<String>,
}

impl VersionFileRecord {
    /// Build a record for a version and the issues it ships.
    ///
    /// Issue types outside [`FEATURE_TYPES`] and [`BUGFIX_TYPES`] are left out.
    pub fn new(
        repository_id: &str,
        environment: Environment,
        version: &str,
        issues: &[Issue],
        commit: Option<String>,
    ) -> Self {
        let keys_of = |types: &[&str]| {
            issues
                .iter()
                .filter(|i| {
                    types
                        .iter()
                        .any(|t| t.eq_ignore_ascii_case(&i.issue_type))
                })
                .map(|i| i.issue_key.clone())
                .collect::<Vec<_>>()
        };
        Self {
            repository_id: repository_id.to_string(),
            environment,
            version: version.to_string(),
            build_time: Utc::now(),
            features: keys_of(FEATURE_TYPES),
            bugfixes: keys_of(BUGFIX_TYPES),
            commit,
        }
    }

    /// Where this record lands under an export root.
    pub fn export_path(&self, export_dir: &Utf8Path) -> Utf8PathBuf {
        export_dir
            .join(&self.repository_id)
            .join(self.environment.as_str())
            .join(VERSION_FILE_NAME)
    }
}

/// Write a record to `<export_dir>/<repository>/<environment>/version.json`.
///
/// The file is written to a temporary sibling and renamed into place, so
/// readers never observe a partial file.
#[instrument(
    skip(record),
    fields(repository = %record.repository_id, environment = %record.environment)
)]
pub fn export_version_file(
    record: &VersionFileRecord,
    export_dir: &Utf8Path,
) -> VersionFileResult<Utf8PathBuf> {
    let path = record.export_path(export_dir);
    let dir = path.parent().unwrap_or(export_dir).to_path_buf();
    let io_err = |source| VersionFileError::Io {
        path: path.clone(),
        source,
    };

    std::fs::create_dir_all(&dir).map_err(io_err)?;
    let body = serde_json::to_vec_pretty(record)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.write_all(b"\n").map_err(io_err)?;
    tmp.persist(&path).map_err(|e| io_err(e.error))?;

    debug!(%path, "exported version file");
    Ok(path)
}
