//! Calc command: compute a next version without touching any state.

use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, instrument};

use stagever_core::version::calculate::{CalculationMode, VersionCalc, calculate};
use stagever_core::version::{BumpLevel, parse_version};

/// Arguments for the `calc` subcommand.
#[derive(Args, Debug)]
pub struct CalcArgs {
    /// Baseline version (a leading `v` is accepted)
    #[arg(long, value_name = "VERSION", default_value = "0.0.0")]
    pub from: String,

    /// Bump level
    #[arg(long, value_enum)]
    pub bump: BumpLevel,

    /// Keep lower components instead of resetting them
    #[arg(long)]
    pub accumulate: bool,
}

fn run(args: &CalcArgs) -> anyhow::Result<VersionCalc> {
    let current = parse_version(&args.from)?;
    let mode = if args.accumulate {
        CalculationMode::Accumulate
    } else {
        CalculationMode::Standard
    };
    Ok(calculate(&current, args.bump, mode)?)
}

/// Print the next version.
#[instrument(name = "cmd_calc", skip_all, fields(from = %args.from, bump = %args.bump))]
pub fn cmd_calc(args: CalcArgs, global_json: bool) -> anyhow::Result<()> {
    debug!(accumulate = args.accumulate, "executing calc command");
    let calc = run(&args)?;
    if global_json {
        println!("{}", serde_json::to_string_pretty(&calc)?);
    } else {
        println!("{}", calc.version.green());
    }
    Ok(())
}
