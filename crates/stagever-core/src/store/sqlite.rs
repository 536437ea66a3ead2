//! SQLite-backed version store.
//!
//! The schema is versioned through a single-row `schema_version` table.
//! Migrations run sequentially on open; a database written by a newer
//! release is refused rather than silently misread.
//!
//! Uniqueness invariants live in the schema as `UNIQUE` constraints, and
//! every upsert is one `INSERT .. ON CONFLICT` statement, so concurrent
//! processes sharing a database file cannot create duplicates.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, instrument};

use crate::environment::Environment;
use crate::store::{
    NewRelease, NewVersion, ReleaseRecord, StoreError, StoreResult, VersionId, VersionIssue,
    VersionRecord, VersionStatus, VersionStore,
};
use crate::version_file::VersionFileRecord;

/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const VERSION_COLUMNS: &str = "id, repository_id, version, major, minor, patch, prerelease, \
     build_metadata, release_type, status, environment, branch, is_production, \
     parent_version_id, changelog, created_at, updated_at, released_at";

const RELEASE_COLUMNS: &str = "id, repository_id, tag_name, name, body, url, prerelease, \
     published_at, version_id, created_at, updated_at";

/// A [`VersionStore`] in a SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and bring its schema up to date.
    #[instrument]
    pub fn open(path: &Utf8Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::storage("create database directory", e))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::storage("open database", e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| StoreError::storage("enable WAL", e))?;
        debug!(%mode, "opened database");
        Self::from_connection(conn)
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::storage("open database", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| StoreError::storage("enable foreign keys", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::storage("set busy timeout", e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );",
        )
        .map_err(|e| StoreError::storage("create schema_version table", e))?;

        let current: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| StoreError::storage("read schema version", e))?
            .unwrap_or(0);

        run_migrations(&conn, current)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Schema version of the open database.
    pub fn schema_version(&self) -> StoreResult<i64> {
        self.lock()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::storage("read schema version", e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_migrations(conn: &Connection, from_version: i64) -> StoreResult<()> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::storage(
            "schema version",
            format!(
                "database schema version {from_version} is newer than supported version \
                 {CURRENT_SCHEMA_VERSION}"
            ),
        ));
    }
    if from_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if from_version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id TEXT NOT NULL,
                version TEXT NOT NULL,
                major INTEGER NOT NULL,
                minor INTEGER NOT NULL,
                patch INTEGER NOT NULL,
                prerelease TEXT,
                build_metadata TEXT,
                release_type TEXT NOT NULL,
                status TEXT NOT NULL,
                environment TEXT NOT NULL,
                branch TEXT NOT NULL,
                is_production INTEGER NOT NULL DEFAULT 0,
                parent_version_id INTEGER REFERENCES versions(id),
                changelog TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                released_at TEXT,
                UNIQUE (repository_id, environment, version)
            );
            CREATE INDEX IF NOT EXISTS idx_versions_current
                ON versions(repository_id, environment, major, minor, patch);

            CREATE TABLE IF NOT EXISTS version_issues (
                version_id INTEGER NOT NULL REFERENCES versions(id),
                issue_id TEXT NOT NULL,
                ai_title TEXT,
                ai_summary TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (version_id, issue_id)
            );",
        )
        .map_err(|e| StoreError::storage("migration v1", e))?;
    }

    if from_version < 2 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS releases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id TEXT NOT NULL,
                tag_name TEXT NOT NULL,
                name TEXT,
                body TEXT,
                url TEXT,
                prerelease INTEGER NOT NULL DEFAULT 0,
                published_at TEXT,
                version_id INTEGER NOT NULL REFERENCES versions(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (repository_id, tag_name)
            );

            CREATE TABLE IF NOT EXISTS version_files (
                repository_id TEXT NOT NULL,
                environment TEXT NOT NULL,
                version TEXT NOT NULL,
                build_time TEXT NOT NULL,
                features TEXT NOT NULL,
                bugfixes TEXT NOT NULL,
                commit_sha TEXT,
                PRIMARY KEY (repository_id, environment)
            );",
        )
        .map_err(|e| StoreError::storage("migration v2", e))?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![CURRENT_SCHEMA_VERSION],
    )
    .map_err(|e| StoreError::storage("update schema version", e))?;
    debug!(
        from = from_version,
        to = CURRENT_SCHEMA_VERSION,
        "migrated database schema"
    );
    Ok(())
}

/// A `versions` row before its text columns are validated.
struct VersionRow {
    id: i64,
    repository_id: String,
    version: String,
    major: i64,
    minor: i64,
    patch: i64,
    prerelease: Option<String>,
    build_metadata: Option<String>,
    release_type: String,
    status: String,
    environment: String,
    branch: String,
    is_production: bool,
    parent_version_id: Option<i64>,
    changelog: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

impl VersionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repository_id: row.get(1)?,
            version: row.get(2)?,
            major: row.get(3)?,
            minor: row.get(4)?,
            patch: row.get(5)?,
            prerelease: row.get(6)?,
            build_metadata: row.get(7)?,
            release_type: row.get(8)?,
            status: row.get(9)?,
            environment: row.get(10)?,
            branch: row.get(11)?,
            is_production: row.get(12)?,
            parent_version_id: row.get(13)?,
            changelog: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            released_at: row.get(17)?,
        })
    }
}

impl TryFrom<VersionRow> for VersionRecord {
    type Error = StoreError;

    fn try_from(row: VersionRow) -> StoreResult<Self> {
        let component = |value: i64, name: &str| {
            u64::try_from(value).map_err(|_| {
                StoreError::corruption(format!("version {} has negative {name}", row.id))
            })
        };
        Ok(Self {
            id: row.id,
            major: component(row.major, "major")?,
            minor: component(row.minor, "minor")?,
            patch: component(row.patch, "patch")?,
            release_type: row
                .release_type
                .parse()
                .map_err(StoreError::corruption)?,
            status: row
                .status
                .parse()
                .map_err(StoreError::corruption)?,
            environment: row
                .environment
                .parse()
                .map_err(StoreError::corruption)?,
            repository_id: row.repository_id,
            version: row.version,
            prerelease: row.prerelease,
            build_metadata: row.build_metadata,
            branch: row.branch,
            is_production: row.is_production,
            parent_version_id: row.parent_version_id,
            changelog: row.changelog,
            created_at: row.created_at,
            updated_at: row.updated_at,
            released_at: row.released_at,
        })
    }
}

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<ReleaseRecord> {
    Ok(ReleaseRecord {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        tag_name: row.get(2)?,
        name: row.get(3)?,
        body: row.get(4)?,
        url: row.get(5)?,
        prerelease: row.get(6)?,
        published_at: row.get(7)?,
        version_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn query_versions(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<VersionRecord>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::storage(operation, e))?;
    let rows = stmt
        .query_map(params, VersionRow::from_row)
        .map_err(|e| StoreError::storage(operation, e))?;
    rows.map(|row| {
        row.map_err(|e| StoreError::storage(operation, e))
            .and_then(VersionRecord::try_from)
    })
    .collect()
}

fn fetch_version(conn: &Connection, id: VersionId) -> StoreResult<Option<VersionRecord>> {
    let sql = format!("SELECT {VERSION_COLUMNS} FROM versions WHERE id = ?1");
    Ok(query_versions(conn, "get version", &sql, params![id])?
        .into_iter()
        .next())
}

fn version_exists(conn: &Connection, id: VersionId) -> StoreResult<bool> {
    conn.query_row("SELECT 1 FROM versions WHERE id = ?1", params![id], |_| {
        Ok(())
    })
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| StoreError::storage("check version", e))
}

fn not_found(id: VersionId) -> StoreError {
    StoreError::NotFound {
        entity: "version",
        id: id.to_string(),
    }
}

fn to_column(value: u64, name: &'static str) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::storage("upsert version", format!("{name} {value} too large")))
}

impl VersionStore for SqliteStore {
    fn upsert_version(&self, new: &NewVersion) -> StoreResult<VersionRecord> {
        let conn = self.lock();
        let now = Utc::now();
        let id: VersionId = conn
            .query_row(
                "INSERT INTO versions (
                    repository_id, version, major, minor, patch, prerelease, build_metadata,
                    release_type, status, environment, branch, is_production,
                    parent_version_id, created_at, updated_at, released_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14, ?15)
                ON CONFLICT (repository_id, environment, version)
                    DO UPDATE SET updated_at = excluded.updated_at
                RETURNING id",
                params![
                    new.repository_id,
                    new.version.to_string(),
                    to_column(new.version.major, "major")?,
                    to_column(new.version.minor, "minor")?,
                    to_column(new.version.patch, "patch")?,
                    new.prerelease(),
                    new.build_metadata(),
                    new.release_type.as_str(),
                    new.status.as_str(),
                    new.environment.as_str(),
                    new.branch,
                    new.environment == Environment::Production,
                    new.parent_version_id,
                    now,
                    new.released_at,
                ],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::storage("upsert version", e))?;
        fetch_version(&conn, id)?.ok_or_else(|| not_found(id))
    }

    fn link_issue(&self, version_id: VersionId, issue_id: &str) -> StoreResult<bool> {
        let conn = self.lock();
        if !version_exists(&conn, version_id)? {
            return Err(not_found(version_id));
        }
        let inserted = conn
            .execute(
                "INSERT INTO version_issues (version_id, issue_id, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (version_id, issue_id) DO NOTHING",
                params![version_id, issue_id, Utc::now()],
            )
            .map_err(|e| StoreError::storage("link issue", e))?;
        Ok(inserted > 0)
    }

    fn get_version(&self, version_id: VersionId) -> StoreResult<Option<VersionRecord>> {
        fetch_version(&self.lock(), version_id)
    }

    fn find_version(
        &self,
        repository_id: &str,
        environment: Environment,
        version: &str,
    ) -> StoreResult<Option<VersionRecord>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE repository_id = ?1 AND environment = ?2 AND version = ?3"
        );
        Ok(query_versions(
            &self.lock(),
            "find version",
            &sql,
            params![repository_id, environment.as_str(), version],
        )?
        .into_iter()
        .next())
    }

    fn latest_version(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionRecord>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE repository_id = ?1 AND environment = ?2
               AND status NOT IN ('failed', 'cancelled')
             ORDER BY major DESC, minor DESC, patch DESC, created_at DESC, id DESC
             LIMIT 1"
        );
        Ok(query_versions(
            &self.lock(),
            "latest version",
            &sql,
            params![repository_id, environment.as_str()],
        )?
        .into_iter()
        .next())
    }

    fn list_versions(
        &self,
        repository_id: &str,
        environment: Option<Environment>,
    ) -> StoreResult<Vec<VersionRecord>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM versions
             WHERE repository_id = ?1 AND (?2 IS NULL OR environment = ?2)
             ORDER BY created_at DESC, id DESC"
        );
        query_versions(
            &self.lock(),
            "list versions",
            &sql,
            params![repository_id, environment.map(Environment::as_str)],
        )
    }

    fn linked_issues(&self, version_id: VersionId) -> StoreResult<Vec<VersionIssue>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT version_id, issue_id, ai_title, ai_summary, created_at
                 FROM version_issues WHERE version_id = ?1
                 ORDER BY created_at, rowid",
            )
            .map_err(|e| StoreError::storage("linked issues", e))?;
        let rows = stmt
            .query_map(params![version_id], |row| {
                Ok(VersionIssue {
                    version_id: row.get(0)?,
                    issue_id: row.get(1)?,
                    ai_title: row.get(2)?,
                    ai_summary: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .map_err(|e| StoreError::storage("linked issues", e))?;
        rows.collect::<Result<_, _>>()
            .map_err(|e| StoreError::storage("linked issues", e))
    }

    fn set_status(
        &self,
        version_id: VersionId,
        status: VersionStatus,
        released_at: Option<DateTime<Utc>>,
    ) -> StoreResult<VersionRecord> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE versions
                 SET status = ?2, released_at = COALESCE(?3, released_at), updated_at = ?4
                 WHERE id = ?1",
                params![version_id, status.as_str(), released_at, Utc::now()],
            )
            .map_err(|e| StoreError::storage("set status", e))?;
        if changed == 0 {
            return Err(not_found(version_id));
        }
        fetch_version(&conn, version_id)?.ok_or_else(|| not_found(version_id))
    }

    fn set_changelog(&self, version_id: VersionId, changelog: &str) -> StoreResult<()> {
        let changed = self
            .lock()
            .execute(
                "UPDATE versions SET changelog = ?2, updated_at = ?3 WHERE id = ?1",
                params![version_id, changelog, Utc::now()],
            )
            .map_err(|e| StoreError::storage("set changelog", e))?;
        if changed == 0 {
            return Err(not_found(version_id));
        }
        Ok(())
    }

    fn annotate_issue(
        &self,
        version_id: VersionId,
        issue_id: &str,
        title: Option<&str>,
        summary: Option<&str>,
    ) -> StoreResult<()> {
        let changed = self
            .lock()
            .execute(
                "UPDATE version_issues SET ai_title = ?3, ai_summary = ?4
                 WHERE version_id = ?1 AND issue_id = ?2",
                params![version_id, issue_id, title, summary],
            )
            .map_err(|e| StoreError::storage("annotate issue", e))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "issue link",
                id: format!("{version_id}/{issue_id}"),
            });
        }
        Ok(())
    }

    fn upsert_release(&self, release: &NewRelease) -> StoreResult<ReleaseRecord> {
        let conn = self.lock();
        if !version_exists(&conn, release.version_id)? {
            return Err(not_found(release.version_id));
        }
        let sql = format!(
            "INSERT INTO releases (
                repository_id, tag_name, name, body, url, prerelease, published_at,
                version_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            ON CONFLICT (repository_id, tag_name) DO UPDATE SET
                name = excluded.name,
                body = excluded.body,
                url = excluded.url,
                prerelease = excluded.prerelease,
                published_at = excluded.published_at,
                version_id = excluded.version_id,
                updated_at = excluded.updated_at
            RETURNING {RELEASE_COLUMNS}"
        );
        conn.query_row(
            &sql,
            params![
                release.repository_id,
                release.tag_name,
                release.name,
                release.body,
                release.url,
                release.prerelease,
                release.published_at,
                release.version_id,
                Utc::now(),
            ],
            release_from_row,
        )
        .map_err(|e| StoreError::storage("upsert release", e))
    }

    fn upsert_version_file(&self, record: &VersionFileRecord) -> StoreResult<()> {
        let features = serde_json::to_string(&record.features)
            .map_err(|e| StoreError::storage("encode version file", e))?;
        let bugfixes = serde_json::to_string(&record.bugfixes)
            .map_err(|e| StoreError::storage("encode version file", e))?;
        self.lock()
            .execute(
                "INSERT INTO version_files (
                    repository_id, environment, version, build_time, features, bugfixes, commit_sha
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (repository_id, environment) DO UPDATE SET
                    version = excluded.version,
                    build_time = excluded.build_time,
                    features = excluded.features,
                    bugfixes = excluded.bugfixes,
                    commit_sha = excluded.commit_sha",
                params![
                    record.repository_id,
                    record.environment.as_str(),
                    record.version,
                    record.build_time,
                    features,
                    bugfixes,
                    record.commit,
                ],
            )
            .map_err(|e| StoreError::storage("upsert version file", e))?;
        Ok(())
    }

    fn version_file(
        &self,
        repository_id: &str,
        environment: Environment,
    ) -> StoreResult<Option<VersionFileRecord>> {
        let row = self
            .lock()
            .query_row(
                "SELECT version, build_time, features, bugfixes, commit_sha
                 FROM version_files WHERE repository_id = ?1 AND environment = ?2",
                params![repository_id, environment.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, DateTime<Utc>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::storage("read version file", e))?;

        let Some((version, build_time, features, bugfixes, commit)) = row else {
            return Ok(None);
        };
        let decode = |raw: &str| {
            serde_json::from_str::<Vec<String>>(raw).map_err(|e| {
                StoreError::corruption(format!(
                    "version file of {repository_id}/{environment}: {e}"
                ))
            })
        };
        Ok(Some(VersionFileRecord {
            repository_id: repository_id.to_string(),
            environment,
            version,
            build_time,
            features: decode(&features)?,
            bugfixes: decode(&bugfixes)?,
            commit,
        }))
    }
}
