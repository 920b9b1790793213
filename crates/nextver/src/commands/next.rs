//! Next command: print the next version.

use anyhow::Context;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{debug, info, instrument};

use nextver_core::plugins::{NextVersion, RunGoal};

use super::{CacheFlags, RunContext, run_pipeline};

/// Arguments for the `next` subcommand.
#[derive(Args, Debug, Default)]
pub struct NextArgs {
    /// Cache selection for this run.
    #[command(flatten)]
    pub cache: CacheFlags,
}

/// Compute (or reuse) the next version and print it.
///
/// The bare version goes to stdout so the command composes in scripts;
/// where it came from is reported on stderr.
#[instrument(name = "cmd_next", skip_all, fields(json_output = global_json))]
pub async fn cmd_next(
    args: NextArgs,
    global_json: bool,
    quiet: bool,
    ctx: &RunContext,
) -> anyhow::Result<()> {
    debug!(?args, "executing next command");

    let (_runner, outcome) = run_pipeline(ctx, args.cache.overrides(), RunGoal::NextVersion).await?;
    let next = outcome
        .next_version
        .context("run finished without a next version")?;
    info!(
        version = %next.version,
        cached = next.cached,
        cache_id = %next.cache_id,
        "next version resolved"
    );

    if global_json {
        println!("{}", serde_json::to_string_pretty(&*next)?);
    } else {
        println!("{}", next.version);
        if !quiet {
            eprintln!("{}", describe(&next));
        }
    }
    Ok(())
}

fn describe(next: &NextVersion) -> String {
    let source = if next.cached {
        format!("{} {}", "✓".green(), "cached".green())
    } else {
        let reason = next
            .reason
            .as_ref()
            .map_or_else(String::new, |reason| format!(" ({reason})"));
        format!("{} computed{}", "○".yellow(), reason.dimmed())
    };

    let mut line = format!("{source} {}", format!("[{}]", next.cache_id).dimmed());
    if let Some(previous) = &next.previous_version {
        line.push_str(&format!(" {} {previous}", "from".dimmed()));
    }
    if let Some(bump) = next.summary.as_ref().and_then(|summary| summary.bump) {
        line.push_str(&format!(" {} {bump}", "bump".dimmed()));
    }
    line
}
