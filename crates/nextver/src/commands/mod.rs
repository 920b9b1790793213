//! Command implementations

pub mod cache;

pub mod doctor;

pub mod next;

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use nextver_core::LoadedConfig;
use nextver_core::plugins::{CacheOverrides, RunGoal, RunOutcome, Runner, StandardSetup};

/// Cache flags shared by commands that run the plugin pipeline.
#[derive(Args, Debug, Default, Clone)]
pub struct CacheFlags {
    /// Cache id to use (overrides `cache.cache_id`)
    #[arg(long, value_name = "ID")]
    pub cache_id: Option<String>,

    /// Give up waiting for a cache file lock after MS milliseconds
    #[arg(long, value_name = "MS")]
    pub lock_timeout: Option<u64>,

    /// Ignore the cache for this run
    #[arg(long)]
    pub no_cache: bool,
}

impl CacheFlags {
    /// The flags as overrides of the configured cache options.
    pub fn overrides(&self) -> CacheOverrides {
        CacheOverrides {
            cache_id: self.cache_id.clone(),
            lock_timeout: self.lock_timeout.map(Duration::from_millis),
            enabled: self.no_cache.then_some(false),
        }
    }
}

/// What every pipeline run needs from the CLI layer.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Configuration and its source files.
    pub loaded: LoadedConfig,
    /// Directory the run starts from.
    pub cwd: Utf8PathBuf,
    /// Show a spinner on stderr while the run is in progress.
    pub progress: bool,
}

impl RunContext {
    /// Progress is shown only for interactive, human-readable runs.
    pub fn new(loaded: LoadedConfig, cwd: Utf8PathBuf, json: bool, quiet: bool) -> Self {
        Self {
            loaded,
            cwd,
            progress: !json && !quiet && std::io::stderr().is_terminal(),
        }
    }

    fn setup(&self, overrides: CacheOverrides) -> StandardSetup {
        StandardSetup {
            loaded: self.loaded.clone(),
            working_dir: self.cwd.clone(),
            overrides,
            repository: None,
        }
    }
}

/// Build the standard runner, drive one run towards `goal`, then dispose
/// the plugins. The runner is returned so callers can reach the services
/// published during the run.
pub(crate) async fn run_pipeline(
    ctx: &RunContext,
    overrides: CacheOverrides,
    goal: RunGoal,
) -> anyhow::Result<(Runner, RunOutcome)> {
    let runner = Runner::standard(ctx.setup(overrides)).context("failed to set up plugins")?;
    debug!(?goal, plugins = runner.registry().len(), "starting run");

    let spinner = ctx.progress.then(|| spinner("Checking version cache..."));
    let result = runner.run(goal).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    runner.shutdown().await;

    let outcome = result.context("run failed")?;
    Ok((runner, outcome))
}

pub(crate) fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("valid template"),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}
