//! Release command: import a published release.

use anyhow::Context;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use stagever_core::config::Config;
use stagever_core::release::ReleaseEvent;

/// Arguments for the `release` subcommand.
#[derive(Args, Debug, Default)]
pub struct ReleaseArgs {
    /// Repository identifier
    #[arg(long, value_name = "ID")]
    pub repo: String,

    /// Release tag (e.g. v1.4.0 or v2.0.0-rc.1)
    #[arg(long)]
    pub tag: String,

    /// Mark the release as a prerelease (imports into staging)
    #[arg(long)]
    pub prerelease: bool,

    /// The release is an unpublished draft
    #[arg(long)]
    pub draft: bool,

    /// Release name
    #[arg(long)]
    pub name: Option<String>,

    /// Release notes
    #[arg(long)]
    pub body: Option<String>,

    /// Release page URL
    #[arg(long)]
    pub url: Option<String>,

    /// Branch or commit the tag points at
    #[arg(long, value_name = "REF")]
    pub target: Option<String>,
}

impl ReleaseArgs {
    fn event(&self) -> ReleaseEvent {
        ReleaseEvent {
            name: self.name.clone(),
            body: self.body.clone(),
            url: self.url.clone(),
            prerelease: self.prerelease,
            draft: self.draft,
            target_commitish: self.target.clone(),
            ..ReleaseEvent::published(self.tag.clone())
        }
    }
}

/// Import a published release.
#[instrument(name = "cmd_release", skip_all, fields(repo = %args.repo, tag = %args.tag))]
pub fn cmd_release(args: ReleaseArgs, global_json: bool, config: &Config) -> anyhow::Result<()> {
    let event = args.event();
    debug!(environment = %event.environment(), "executing release command");

    let engine = super::build_engine(config)?;
    let imported = engine
        .handle_github_release(&args.repo, &event)
        .with_context(|| format!("failed to import release {}", args.tag))?;

    if global_json {
        println!("{}", serde_json::to_string_pretty(&imported)?);
        return Ok(());
    }
    match imported {
        Some(imported) => {
            super::print_version_line(&imported.version);
            let verb = if imported.created { "imported" } else { "marked released" };
            println!("  {} {} {}", "Release".dimmed(), imported.release.tag_name.cyan(), verb);
        }
        None => println!("  {} {}", "○".yellow(), "Draft release ignored".yellow()),
    }
    Ok(())
}
