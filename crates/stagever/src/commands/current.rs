//! Current command: show the version lines of a repository.

use clap::Args;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use stagever_core::config::Config;
use stagever_core::environment::Environment;
use stagever_core::store::{VersionRecord, VersionStore};

/// Arguments for the `current` subcommand.
#[derive(Args, Debug, Default)]
pub struct CurrentArgs {
    /// Repository identifier
    #[arg(long, value_name = "ID")]
    pub repo: String,

    /// Only show this environment
    #[arg(long, short = 'e', value_enum)]
    pub environment: Option<Environment>,

    /// List every stored version, newest first
    #[arg(long)]
    pub history: bool,
}

#[derive(Debug, Serialize)]
struct LineStatus {
    environment: Environment,
    current: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<VersionRecord>,
}

fn gather(
    store: &dyn VersionStore,
    repository_id: &str,
    only: Option<Environment>,
) -> anyhow::Result<Vec<LineStatus>> {
    let environments = only.map_or_else(|| Environment::ALL.to_vec(), |env| vec![env]);
    let mut lines = Vec::with_capacity(environments.len());
    for environment in environments {
        let record = store.latest_version(repository_id, environment)?;
        let current = match record {
            Some(ref record) => record.semver()?.to_string(),
            None => stagever_core::version::zero().to_string(),
        };
        lines.push(LineStatus {
            environment,
            current,
            record,
        });
    }
    Ok(lines)
}

/// Show current versions per environment.
#[instrument(name = "cmd_current", skip_all, fields(repo = %args.repo))]
pub fn cmd_current(args: CurrentArgs, global_json: bool, config: &Config) -> anyhow::Result<()> {
    debug!(environment = ?args.environment, history = args.history, "executing current command");
    let store = super::open_store(config)?;

    if args.history {
        let versions = store.list_versions(&args.repo, args.environment)?;
        if global_json {
            println!("{}", serde_json::to_string_pretty(&versions)?);
        } else if versions.is_empty() {
            println!("  {} No versions recorded for {}", "○".yellow(), args.repo.cyan());
        } else {
            versions.iter().for_each(super::print_version_line);
        }
        return Ok(());
    }

    let lines = gather(&store, &args.repo, args.environment)?;
    if global_json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    println!("{}", args.repo.bold().underline());
    for line in &lines {
        let status = line
            .record
            .as_ref()
            .map_or_else(|| "none".dimmed().to_string(), |r| r.status.as_str().to_string());
        println!(
            "  {:<12} {} ({})",
            line.environment.as_str().dimmed(),
            line.current.green(),
            status
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{build_engine, testutil};
    use stagever_core::tracker::CommitInfo;

    #[test]
    fn empty_repository_reports_zero_everywhere() {
        let (_dir, config) = testutil::workspace();
        let store = crate::commands::open_store(&config).unwrap();
        let lines = gather(&store, "web", None).unwrap();
        assert_eq!(lines.len(), Environment::ALL.len());
        assert!(lines.iter().all(|l| l.current == "0.0.0" && l.record.is_none()));
    }

    #[test]
    fn reports_merged_version() {
        let (_dir, config) = testutil::workspace();
        build_engine(&config)
            .unwrap()
            .handle_branch_merge("web", "dev", &[CommitInfo::from_message("PROJ-2: dark mode")])
            .unwrap();

        let store = crate::commands::open_store(&config).unwrap();
        let lines = gather(&store, "web", Some(Environment::Development)).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].current, "0.1.0");
    }

    #[test]
    fn history_and_text_output_succeed() {
        let (_dir, config) = testutil::workspace();
        let args = CurrentArgs {
            repo: "web".into(),
            history: true,
            ..CurrentArgs::default()
        };
        assert!(cmd_current(args, false, &config).is_ok());
        let args = CurrentArgs {
            repo: "web".into(),
            ..CurrentArgs::default()
        };
        assert!(cmd_current(args, false, &config).is_ok());
    }
}
