//! Doctor command: diagnose configuration, database, and tracker setup.

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use stagever_core::config::{self, Config};
use stagever_core::store::SqliteStore;
use stagever_core::store::sqlite::CURRENT_SCHEMA_VERSION;

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Print the report as YAML
    #[arg(long)]
    pub yaml: bool,
}

#[derive(Serialize)]
struct DoctorReport {
    directories: DirectoryPaths,
    config: ConfigStatus,
    database: DatabaseStatus,
    tracker: TrackerStatus,
    environment: EnvironmentInfo,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    data: Option<String>,
    data_local: Option<String>,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Path to the discovered project config file, if any
    file: Option<String>,
    found: bool,
    repositories: usize,
}

#[derive(Serialize)]
struct DatabaseStatus {
    path: Option<String>,
    ok: bool,
    schema_version: Option<i64>,
    expected_schema_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct TrackerStatus {
    file: Option<String>,
    ok: bool,
    repositories: usize,
    issues: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    cwd: String,
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    value: Option<String>,
}

const ENV_VARS: &[&str] = &[
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "RUST_LOG",
    "STAGEVER_LOG_PATH",
    "STAGEVER_LOG_DIR",
];

impl DatabaseStatus {
    fn check(config: &Config) -> Self {
        let path = config.database_path();
        let mut status = Self {
            path: path.as_ref().map(ToString::to_string),
            ok: false,
            schema_version: None,
            expected_schema_version: CURRENT_SCHEMA_VERSION,
            error: None,
        };
        let Some(path) = path else {
            status.error = Some("no database path could be determined".into());
            return status;
        };
        match SqliteStore::open(&path).and_then(|store| store.schema_version()) {
            Ok(version) => {
                status.ok = version == CURRENT_SCHEMA_VERSION;
                status.schema_version = Some(version);
            }
            Err(e) => {
                warn!(error = %e, %path, "database check failed");
                status.error = Some(e.to_string());
            }
        }
        status
    }
}

impl TrackerStatus {
    fn check(config: &Config) -> Self {
        match super::load_tracker(config) {
            Ok(tracker) => Self {
                file: config.tracker_file.as_ref().map(ToString::to_string),
                ok: true,
                repositories: tracker.repository_count(),
                issues: tracker.issue_count(),
                error: None,
            },
            Err(e) => Self {
                file: config.tracker_file.as_ref().map(ToString::to_string),
                ok: false,
                repositories: 0,
                issues: 0,
                error: Some(format!("{e:#}")),
            },
        }
    }
}

impl DoctorReport {
    fn gather(config: &Config, cwd: &camino::Utf8Path) -> Self {
        let config_file = config::find_project_config(cwd);
        Self {
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                data: config::user_data_dir().map(|p| p.to_string()),
                data_local: config::user_data_local_dir().map(|p| p.to_string()),
            },
            config: ConfigStatus {
                found: config_file.is_some(),
                file: config_file.map(|p| p.to_string()),
                repositories: config.repositories.len(),
            },
            database: DatabaseStatus::check(config),
            tracker: TrackerStatus::check(config),
            environment: EnvironmentInfo {
                cwd: cwd.to_string(),
                env_vars: ENV_VARS
                    .iter()
                    .map(|&name| EnvVar {
                        name,
                        value: std::env::var(name).ok(),
                    })
                    .collect(),
            },
        }
    }
}

/// Run diagnostics and report configuration status.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `config` - Loaded configuration
/// * `cwd` - Current working directory
#[instrument(name = "cmd_doctor", skip_all, fields(json_output))]
pub fn cmd_doctor(
    args: DoctorArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, yaml = args.yaml, "executing doctor command");

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Gathering diagnostics...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    let report = DoctorReport::gather(config, cwd);
    spinner.finish_and_clear();

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if args.yaml {
        print!("{}", serde_saphyr::to_string(&report)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    match report.config.file {
        Some(ref file) => println!("  {} Config file: {}", "✓".green(), file.cyan()),
        None => {
            println!("  {} No config file found", "○".yellow());
            offer_config_creation()?;
        }
    }
    println!("  {}: {}", "Repositories".dimmed(), report.config.repositories);
    println!();

    println!("{}", "Database".bold().underline());
    let db_path = report.database.path.as_deref().unwrap_or("(unavailable)");
    match (report.database.ok, report.database.schema_version) {
        (true, Some(version)) => println!(
            "  {} {} (schema v{version})",
            "✓".green(),
            db_path.cyan()
        ),
        (false, Some(version)) => println!(
            "  {} {} (schema v{version}, expected v{})",
            "✗".red(),
            db_path.cyan(),
            report.database.expected_schema_version
        ),
        _ => println!(
            "  {} {}: {}",
            "✗".red(),
            db_path.cyan(),
            report.database.error.as_deref().unwrap_or("unknown error")
        ),
    }
    println!();

    println!("{}", "Tracker".bold().underline());
    let tracker_file = report.tracker.file.as_deref().unwrap_or("(none)");
    if report.tracker.ok {
        println!(
            "  {} {} ({} repositories, {} issues)",
            "✓".green(),
            tracker_file.cyan(),
            report.tracker.repositories,
            report.tracker.issues
        );
    } else {
        println!(
            "  {} {}: {}",
            "✗".red(),
            tracker_file.cyan(),
            report.tracker.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!();

    println!("{}", "Directories".bold().underline());
    print_dir("  Config", report.directories.config.as_deref());
    print_dir("  Data", report.directories.data.as_deref());
    print_dir("  Data (local)", report.directories.data_local.as_deref());
    println!();

    println!("{}", "Environment".bold().underline());
    println!("  {}: {}", "Working directory".dimmed(), report.environment.cwd.cyan());
    let set_vars: Vec<_> = report
        .environment
        .env_vars
        .iter()
        .filter(|v| v.value.is_some())
        .collect();
    if set_vars.is_empty() {
        println!("  {} No XDG/logging overrides set", "○".dimmed());
    } else {
        for var in set_vars {
            println!(
                "  {}: {}",
                var.name.dimmed(),
                var.value.as_deref().unwrap_or("").cyan()
            );
        }
    }

    Ok(())
}

fn print_dir(label: &str, path: Option<&str>) {
    print!("{}: ", label.dimmed());
    match path {
        Some(p) => println!("{}", p.cyan()),
        None => println!("{}", "(unavailable)".yellow()),
    }
}

/// Offer to create a default config file when none exists.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };
    let config_path = config_dir.join("config.yaml");

    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) || config_path.exists() {
        return Ok(());
    }

    let create = Confirm::new("Create a default config file?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    if let Ok(true) = create {
        std::fs::create_dir_all(&config_dir)?;
        let yaml = serde_saphyr::to_string(&Config::default())?;
        std::fs::write(&config_path, yaml)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cwd() -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from("/tmp")
    }

    #[test]
    fn report_checks_database_and_tracker() {
        let (_dir, config) = crate::commands::testutil::workspace();
        let report = DoctorReport::gather(&config, &test_cwd());
        assert!(report.database.ok);
        assert_eq!(report.database.schema_version, Some(CURRENT_SCHEMA_VERSION));
        assert!(report.tracker.ok);
        assert_eq!(report.tracker.issues, 2);
        assert_eq!(report.config.repositories, 1);
    }

    #[test]
    fn broken_tracker_is_reported_not_fatal() {
        let (_dir, mut config) = crate::commands::testutil::workspace();
        config.tracker_file = Some("/nonexistent/tracker.json".into());
        let report = DoctorReport::gather(&config, &test_cwd());
        assert!(!report.tracker.ok);
        assert!(report.tracker.error.is_some());
    }

    #[test]
    fn text_json_and_yaml_output_succeed() {
        let (_dir, config) = crate::commands::testutil::workspace();
        assert!(cmd_doctor(DoctorArgs::default(), false, &config, &test_cwd()).is_ok());
        assert!(cmd_doctor(DoctorArgs::default(), true, &config, &test_cwd()).is_ok());
        assert!(cmd_doctor(DoctorArgs { yaml: true }, false, &config, &test_cwd()).is_ok());
    }
}
