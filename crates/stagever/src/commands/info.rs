//! Info command: show package and configuration information.

use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use stagever_core::config::{self, Config};
use stagever_core::policy::{DEFAULT_DEVELOPMENT_BRANCH, PolicyDefaults};

/// Arguments for the `info` subcommand.
#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct PackageInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    repository: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    license: &'static str,
}

impl PackageInfo {
    const fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            repository: env!("CARGO_PKG_REPOSITORY"),
            license: env!("CARGO_PKG_LICENSE"),
        }
    }
}

#[derive(Serialize)]
struct ConfigInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    config_file: Option<String>,
    log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracker_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    export_dir: Option<String>,
    defaults: PolicyDefaults,
    require_promotion_source: bool,
    repositories: Vec<String>,
}

impl ConfigInfo {
    fn from_config(config: &Config, cwd: &camino::Utf8Path) -> Self {
        Self {
            config_file: config::find_project_config(cwd).map(|p| p.to_string()),
            log_level: config.log_level.as_str().to_string(),
            log_dir: config.log_dir.as_ref().map(ToString::to_string),
            database: config.database_path().map(|p| p.to_string()),
            tracker_file: config.tracker_file.as_ref().map(ToString::to_string),
            export_dir: config.export_dir.as_ref().map(ToString::to_string),
            defaults: config.defaults.clone(),
            require_promotion_source: config.promotion.require_source,
            repositories: config.repositories.keys().cloned().collect(),
        }
    }
}

#[derive(Serialize)]
struct FullInfo {
    #[serde(flatten)]
    package: PackageInfo,
    config: ConfigInfo,
}

/// Print package information.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `config` - Loaded configuration
/// * `cwd` - Current working directory for config discovery
#[instrument(name = "cmd_info", skip_all, fields(json_output))]
pub fn cmd_info(
    _args: InfoArgs,
    global_json: bool,
    config: &Config,
    cwd: &camino::Utf8Path,
) -> anyhow::Result<()> {
    debug!(json_output = global_json, "executing info command");

    let info = FullInfo {
        package: PackageInfo::new(),
        config: ConfigInfo::from_config(config, cwd),
    };

    if global_json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{} {}", info.package.name.bold(), info.package.version.green());
    if !info.package.description.is_empty() {
        println!("{}", info.package.description);
    }
    if !info.package.license.is_empty() {
        println!("{}: {}", "License".dimmed(), info.package.license);
    }
    if !info.package.repository.is_empty() {
        println!("{}: {}", "Repository".dimmed(), info.package.repository.cyan());
    }

    println!();
    println!("{}", "Configuration".bold().underline());
    match info.config.config_file {
        Some(ref path) => println!("{}: {}", "Config file".dimmed(), path.cyan()),
        None => println!("{}: {}", "Config file".dimmed(), "none loaded".yellow()),
    }
    println!("{}: {}", "Log level".dimmed(), info.config.log_level);
    if let Some(ref dir) = info.config.log_dir {
        println!("{}: {}", "Log directory".dimmed(), dir);
    }
    print_optional("Database", info.config.database.as_deref());
    print_optional("Tracker snapshot", info.config.tracker_file.as_deref());
    print_optional("Export directory", info.config.export_dir.as_deref());

    println!();
    println!("{}", "Policy".bold().underline());
    let strategy = info.config.defaults.strategy.unwrap_or_default();
    println!("{}: {}", "Strategy".dimmed(), strategy.to_string().cyan());
    let development_branch = info
        .config
        .defaults
        .development_branch
        .as_deref()
        .unwrap_or(DEFAULT_DEVELOPMENT_BRANCH);
    println!("{}: {}", "Development branch".dimmed(), development_branch.cyan());
    println!(
        "{}: {}",
        "Require promotion source".dimmed(),
        info.config.require_promotion_source
    );
    if info.config.repositories.is_empty() {
        println!("{}: {}", "Repositories".dimmed(), "none configured".yellow());
    } else {
        println!(
            "{}: {}",
            "Repositories".dimmed(),
            info.config.repositories.join(", ").cyan()
        );
    }

    Ok(())
}

fn print_optional(label: &str, value: Option<&str>) {
    match value {
        Some(value) => println!("{}: {}", label.dimmed(), value.cyan()),
        None => println!("{}: {}", label.dimmed(), "not set".yellow()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cwd() -> camino::Utf8PathBuf {
        camino::Utf8PathBuf::from("/tmp")
    }

    #[test]
    fn test_cmd_info_text_succeeds() {
        assert!(cmd_info(InfoArgs::default(), false, &Config::default(), &test_cwd()).is_ok());
    }

    #[test]
    fn test_cmd_info_json_via_global() {
        assert!(cmd_info(InfoArgs::default(), true, &Config::default(), &test_cwd()).is_ok());
    }

    #[test]
    fn test_config_info_no_file() {
        let cwd = camino::Utf8PathBuf::from("/nonexistent");
        let info = ConfigInfo::from_config(&Config::default(), &cwd);
        assert!(info.config_file.is_none());
        assert_eq!(info.log_level, "info");
        assert!(info.repositories.is_empty());
    }

    #[test]
    fn test_config_info_lists_repositories() {
        let (_dir, config) = crate::commands::testutil::workspace();
        let info = ConfigInfo::from_config(&config, &test_cwd());
        assert_eq!(info.repositories, vec!["web".to_string()]);
        assert!(info.database.unwrap().ends_with("stagever.db"));
    }
}
