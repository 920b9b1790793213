//! Cache command: inspect or clear the version cache of one cache id.

use std::time::UNIX_EPOCH;

use anyhow::bail;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, info, instrument};

use nextver_core::cache::{CacheMiss, RepositoryHeadState, VersionCacheManager};
use nextver_core::plugins::{CacheCheckOutcome, RunGoal};

use super::{CacheFlags, RunContext, run_pipeline};

/// Arguments for the `cache` subcommand.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// The cache action to run.
    #[command(subcommand)]
    pub action: CacheAction,
}

/// What to do with the cache.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Check whether the cached version is still valid.
    ///
    /// Like every check, this records the current fingerprint, so a second
    /// status right after a change reports the payload state instead.
    Status(CacheFlags),

    /// Empty the hash and cache records of a cache id
    Clear(CacheFlags),
}

#[derive(Serialize)]
struct CacheStatusReport<'a> {
    cache_id: &'a str,
    enabled: bool,
    up_to_date: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a CacheMiss>,
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    head: Option<&'a RepositoryHeadState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached: Option<CachedSummary>,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct CachedSummary {
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_version: Option<String>,
    created_at: u64,
    extensions: Vec<String>,
}

impl<'a> CacheStatusReport<'a> {
    fn from_outcome(outcome: &'a CacheCheckOutcome) -> Self {
        let cached = outcome.cached().map(|cached| CachedSummary {
            version: cached.cache.version.to_string(),
            previous_version: cached.cache.previous_version.as_ref().map(ToString::to_string),
            created_at: cached
                .created_at
                .duration_since(UNIX_EPOCH)
                .map_or(0, |age| age.as_secs()),
            extensions: cached.extensions.names().map(str::to_string).collect(),
        });
        Self {
            cache_id: &outcome.cache_id,
            enabled: outcome.manager.is_some(),
            up_to_date: outcome.is_up_to_date(),
            reason: outcome.reason(),
            directory: outcome
                .manager
                .as_ref()
                .map(|manager| manager.directory().root().to_string()),
            fingerprint: outcome.fingerprint.as_ref().map(ToString::to_string),
            head: outcome.head.as_ref(),
            cached,
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Dispatch a `cache` action.
#[instrument(name = "cmd_cache", skip_all, fields(json_output = global_json))]
pub async fn cmd_cache(args: CacheArgs, global_json: bool, ctx: &RunContext) -> anyhow::Result<()> {
    debug!(action = ?args.action, "executing cache command");
    match args.action {
        CacheAction::Status(flags) => status(flags, global_json, ctx).await,
        CacheAction::Clear(flags) => clear(flags, global_json, ctx).await,
    }
}

async fn status(flags: CacheFlags, global_json: bool, ctx: &RunContext) -> anyhow::Result<()> {
    let (_runner, outcome) = run_pipeline(ctx, flags.overrides(), RunGoal::CheckCache).await?;
    let report = CacheStatusReport::from_outcome(&outcome.cache);

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Version cache".bold().underline());
    println!("  {}: {}", "Cache id".dimmed(), report.cache_id.cyan());
    if let Some(directory) = &report.directory {
        println!("  {}: {}", "Directory".dimmed(), directory.cyan());
    }
    match (report.up_to_date, report.reason) {
        (true, _) => println!("  {} Up to date", "✓".green()),
        (false, Some(reason)) => println!("  {} Stale: {reason}", "○".yellow()),
        (false, None) => println!("  {} Stale", "○".yellow()),
    }
    if let Some(cached) = &report.cached {
        println!("  {}: {}", "Cached version".dimmed(), cached.version.green());
        if !cached.extensions.is_empty() {
            println!("  {}: {}", "Extensions".dimmed(), cached.extensions.join(", "));
        }
    }
    if let Some(fingerprint) = &report.fingerprint {
        println!("  {}: {}", "Fingerprint".dimmed(), fingerprint);
    }
    println!("  {}: {}ms", "Checked in".dimmed(), report.elapsed_ms);
    Ok(())
}

async fn clear(flags: CacheFlags, global_json: bool, ctx: &RunContext) -> anyhow::Result<()> {
    if flags.no_cache {
        bail!("--no-cache cannot be combined with `cache clear`");
    }
    let (runner, outcome) = run_pipeline(ctx, flags.overrides(), RunGoal::CheckCache).await?;
    let Some(manager) = runner.services().get::<VersionCacheManager>() else {
        bail!(
            "caching is disabled for cache id `{}`; nothing to clear",
            outcome.cache.cache_id
        );
    };

    manager.clear().await?;
    info!(cache_id = manager.cache_id(), "cache cleared");

    if global_json {
        let report = serde_json::json!({
            "cache_id": manager.cache_id(),
            "directory": manager.directory().root().as_str(),
            "cleared": true,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} Cleared cache {}",
            "✓".green(),
            manager.cache_id().cyan()
        );
    }
    Ok(())
}
