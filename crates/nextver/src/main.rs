//! nextver CLI
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use nextver::commands::{self, RunContext};
use nextver::{Cli, Commands};
use nextver_core::config::ConfigLoader;
use tracing::debug;

mod observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.color.apply();

    if let Some(ref dir) = cli.chdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("failed to change directory to {}", dir.display()))?;
    }

    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let cwd = camino::Utf8PathBuf::try_from(cwd).map_err(|e| {
        anyhow::anyhow!(
            "current directory is not valid UTF-8: {}",
            e.into_path_buf().display()
        )
    })?;
    let mut loader = ConfigLoader::new().with_project_search(&cwd);
    if let Some(ref config_path) = cli.config {
        let config_path = camino::Utf8PathBuf::try_from(config_path.clone()).map_err(|e| {
            anyhow::anyhow!(
                "config path is not valid UTF-8: {}",
                e.into_path_buf().display()
            )
        })?;
        loader = loader.with_file(&config_path);
    }
    let loaded = loader
        .load_with_sources()
        .context("failed to load configuration")?;

    let log_settings = observability::LogSettings::new(
        loaded
            .config
            .log_dir
            .as_ref()
            .map(|dir| dir.as_std_path().to_path_buf()),
        cli.quiet,
        cli.verbose,
        loaded.config.log_level.as_str(),
    );
    let _guard = observability::init(&log_settings).context("failed to initialize logging")?;

    debug!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        json = cli.json,
        color = ?cli.color,
        chdir = ?cli.chdir,
        config_sources = loaded.sources.len(),
        "CLI initialized"
    );

    let result = match cli.command {
        Commands::Next(args) => {
            let ctx = RunContext::new(loaded, cwd, cli.json, cli.quiet);
            commands::next::cmd_next(args, cli.json, cli.quiet, &ctx).await
        }
        Commands::Cache(args) => {
            let ctx = RunContext::new(loaded, cwd, cli.json, cli.quiet);
            commands::cache::cmd_cache(args, cli.json, &ctx).await
        }
        Commands::Doctor(args) => commands::doctor::cmd_doctor(args, cli.json, &loaded, &cwd),
    };
    if let Err(ref err) = result {
        tracing::error!(error = %err, "fatal error");
    }
    result
}
