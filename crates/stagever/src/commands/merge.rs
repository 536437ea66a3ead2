//! Merge command: version the commits merged into a branch.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use tracing::{debug, info, instrument};

use stagever_core::config::Config;
use stagever_core::tracker::CommitInfo;

/// Arguments for the `merge` subcommand.
#[derive(Args, Debug, Default)]
pub struct MergeArgs {
    /// Repository identifier
    #[arg(long, value_name = "ID")]
    pub repo: String,

    /// Branch the commits were merged into
    #[arg(long, value_name = "NAME")]
    pub branch: String,

    /// Commit message (repeatable)
    #[arg(short, long = "message", value_name = "MSG")]
    pub messages: Vec<String>,

    /// JSON file with an array of commits (`sha`, `message`, `author`)
    #[arg(long, value_name = "FILE")]
    pub commits: Option<Utf8PathBuf>,
}

impl MergeArgs {
    /// Commits from the file, followed by the inline messages.
    fn collect_commits(&self) -> anyhow::Result<Vec<CommitInfo>> {
        let mut commits = match self.commits {
            Some(ref path) => read_commits(path)?,
            None => Vec::new(),
        };
        commits.extend(self.messages.iter().cloned().map(CommitInfo::from_message));
        Ok(commits)
    }
}

/// Read a JSON array of commits.
pub fn read_commits(path: &camino::Utf8Path) -> anyhow::Result<Vec<CommitInfo>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read commits file {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid commits file {path}"))
}

/// Version a branch merge.
#[instrument(name = "cmd_merge", skip_all, fields(repo = %args.repo, branch = %args.branch))]
pub fn cmd_merge(args: MergeArgs, global_json: bool, config: &Config) -> anyhow::Result<()> {
    let commits = args.collect_commits()?;
    if commits.is_empty() {
        anyhow::bail!("no commits given: pass --message or --commits");
    }
    debug!(commits = commits.len(), "executing merge command");

    let engine = super::build_engine(config)?;
    let version = engine
        .handle_branch_merge(&args.repo, &args.branch, &commits)
        .with_context(|| format!("failed to version merge into {}", args.branch))?;
    if let Some(ref v) = version {
        info!(version = %v.version, environment = %v.environment, "merge versioned");
    }
    super::print_version(version.as_ref(), global_json)
}
