//! Pull request command: version a closed pull request.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use tracing::{debug, instrument};

use stagever_core::config::Config;
use stagever_core::engine::MergeInfo;
use stagever_core::tracker::CommitInfo;

/// Arguments for the `pr` subcommand.
#[derive(Args, Debug, Default)]
pub struct PrArgs {
    /// Repository identifier
    #[arg(long, value_name = "ID")]
    pub repo: String,

    /// Pull request number
    #[arg(long, value_name = "N")]
    pub number: u64,

    /// Branch the pull request merged into
    #[arg(long, value_name = "BRANCH")]
    pub base: String,

    /// Branch the pull request came from
    #[arg(long, value_name = "BRANCH")]
    pub head: Option<String>,

    /// Pull request title
    #[arg(long, default_value = "")]
    pub title: String,

    /// Pull request description
    #[arg(long)]
    pub body: Option<String>,

    /// Commit message (repeatable)
    #[arg(short, long = "message", value_name = "MSG")]
    pub messages: Vec<String>,

    /// JSON file with an array of commits
    #[arg(long, value_name = "FILE")]
    pub commits: Option<Utf8PathBuf>,

    /// The pull request was closed without merging
    #[arg(long)]
    pub unmerged: bool,
}

impl PrArgs {
    fn merge_info(&self) -> anyhow::Result<MergeInfo> {
        let mut commits = match self.commits {
            Some(ref path) => super::merge::read_commits(path)?,
            None => Vec::new(),
        };
        commits.extend(self.messages.iter().cloned().map(CommitInfo::from_message));
        Ok(MergeInfo {
            merged: !self.unmerged,
            base_branch: self.base.clone(),
            head_branch: self.head.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            commits,
        })
    }
}

/// Version a closed pull request.
#[instrument(name = "cmd_pr", skip_all, fields(repo = %args.repo, number = args.number))]
pub fn cmd_pr(args: PrArgs, global_json: bool, config: &Config) -> anyhow::Result<()> {
    let merge = args.merge_info()?;
    debug!(commits = merge.commits.len(), merged = merge.merged, "executing pr command");

    let engine = super::build_engine(config)?;
    let version = engine
        .handle_pull_request_merge(&args.repo, args.number, &merge)
        .with_context(|| format!("failed to version pull request #{}", args.number))?;
    super::print_version(version.as_ref(), global_json)
}
