//! Doctor command: diagnose configuration, repository and cache setup.

use camino::Utf8Path;
use clap::Args;
use inquire::Confirm;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{debug, instrument};

use nextver_core::cache::{CacheDirectory, validate_cache_id};
use nextver_core::config::{self, Config};
use nextver_core::git::{GitRepository, Repository};
use nextver_core::LoadedConfig;

/// Arguments for the `doctor` subcommand.
#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    // No subcommand-specific arguments; uses global --json flag
}

#[derive(Serialize)]
struct DoctorReport {
    config: ConfigStatus,
    repository: RepositoryStatus,
    cache: CacheStatusInfo,
    directories: DirectoryPaths,
    environment: EnvironmentInfo,
}

#[derive(Serialize)]
struct ConfigStatus {
    /// Files merged into the configuration, lowest precedence first
    sources: Vec<String>,
    tag_prefix: String,
    initial_version: String,
}

#[derive(Serialize)]
struct RepositoryStatus {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct CacheStatusInfo {
    enabled: bool,
    cache_id: String,
    cache_id_valid: bool,
    lock_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    directory: Option<String>,
}

#[derive(Serialize)]
struct DirectoryPaths {
    config: Option<String>,
    cache: Option<String>,
}

#[derive(Serialize)]
struct EnvironmentInfo {
    /// Current working directory
    cwd: String,
    /// Relevant environment variables
    env_vars: Vec<EnvVar>,
}

#[derive(Serialize)]
struct EnvVar {
    name: &'static str,
    value: Option<String>,
    description: &'static str,
}

const ENV_VARS: &[(&str, &str)] = &[
    ("XDG_CONFIG_HOME", "Override config directory"),
    ("XDG_CACHE_HOME", "Override cache directory"),
    ("RUST_LOG", "Log filter directive"),
    ("NEXTVER_LOG_PATH", "Explicit log file path"),
    ("NEXTVER_LOG_DIR", "Log directory"),
];

impl DoctorReport {
    fn gather(loaded: &LoadedConfig, cwd: &Utf8Path) -> Self {
        let config = &loaded.config;
        let options = config.cache_options();
        let discovered = GitRepository::discover(cwd);

        let repository = match &discovered {
            Ok(repo) => RepositoryStatus {
                found: true,
                git_dir: Some(repo.git_dir().to_string()),
                branch: repo.current_branch().ok().flatten(),
                latest_tag: repo.latest_version_tag(config.tag_prefix()).ok().flatten(),
                error: None,
            },
            Err(e) => RepositoryStatus {
                found: false,
                git_dir: None,
                branch: None,
                latest_tag: None,
                error: Some(e.to_string()),
            },
        };

        let directory = match (&options.directory, &discovered) {
            (Some(dir), _) => Some(dir.to_string()),
            (None, Ok(repo)) => Some(
                CacheDirectory::resolve(&options, repo.git_dir())
                    .root()
                    .to_string(),
            ),
            (None, Err(_)) => None,
        };

        Self {
            config: ConfigStatus {
                sources: loaded.sources.iter().map(ToString::to_string).collect(),
                tag_prefix: config.tag_prefix().to_string(),
                initial_version: config.initial_version().to_string(),
            },
            repository,
            cache: CacheStatusInfo {
                enabled: options.enabled,
                cache_id_valid: validate_cache_id(&options.cache_id).is_ok(),
                cache_id: options.cache_id,
                lock_timeout_ms: u64::try_from(options.lock_timeout.as_millis())
                    .unwrap_or(u64::MAX),
                directory,
            },
            directories: DirectoryPaths {
                config: config::user_config_dir().map(|p| p.to_string()),
                cache: config::user_cache_dir().map(|p| p.to_string()),
            },
            environment: EnvironmentInfo {
                cwd: cwd.to_string(),
                env_vars: ENV_VARS
                    .iter()
                    .map(|&(name, description)| EnvVar {
                        name,
                        value: std::env::var(name).ok(),
                        description,
                    })
                    .collect(),
            },
        }
    }
}

/// Run diagnostics and report configuration status.
///
/// # Arguments
/// * `global_json` - Global `--json` flag from CLI
/// * `loaded` - Loaded configuration with its source files
/// * `cwd` - Current working directory
#[instrument(name = "cmd_doctor", skip_all, fields(json_output = global_json))]
pub fn cmd_doctor(
    _args: DoctorArgs,
    global_json: bool,
    loaded: &LoadedConfig,
    cwd: &Utf8Path,
) -> anyhow::Result<()> {
    debug!("executing doctor command");

    let spinner = (!global_json).then(|| super::spinner("Gathering diagnostics..."));
    let report = DoctorReport::gather(loaded, cwd);
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    if global_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "Configuration".bold().underline());
    if report.config.sources.is_empty() {
        println!("  {} No config file found, using defaults", "○".yellow());
        offer_config_creation()?;
    } else {
        for source in &report.config.sources {
            println!("  {} {}", "✓".green(), source.cyan());
        }
    }
    println!("  {}: {}", "Tag prefix".dimmed(), report.config.tag_prefix);
    println!("  {}: {}", "Initial version".dimmed(), report.config.initial_version);
    println!();

    println!("{}", "Repository".bold().underline());
    let repo = &report.repository;
    if repo.found {
        println!("  {} Git dir: {}", "✓".green(), repo.git_dir.as_deref().unwrap_or("").cyan());
        print_optional("  Branch", repo.branch.as_deref(), "(detached)");
        print_optional("  Latest tag", repo.latest_tag.as_deref(), "(none)");
    } else {
        println!("  {} {}", "✗".red(), repo.error.as_deref().unwrap_or("not a git repository"));
    }
    println!();

    println!("{}", "Cache".bold().underline());
    let cache = &report.cache;
    if cache.enabled {
        println!("  {} Enabled", "✓".green());
    } else {
        println!("  {} Disabled", "○".yellow());
    }
    if cache.cache_id_valid {
        println!("  {}: {}", "Cache id".dimmed(), cache.cache_id.cyan());
    } else {
        println!("  {} Invalid cache id: {}", "✗".red(), cache.cache_id);
    }
    println!("  {}: {}ms", "Lock timeout".dimmed(), cache.lock_timeout_ms);
    print_optional("  Directory", cache.directory.as_deref(), "(unavailable)");
    println!();

    println!("{}", "Directories".bold().underline());
    print_optional("  Config", report.directories.config.as_deref(), "(unavailable)");
    print_optional("  Cache", report.directories.cache.as_deref(), "(unavailable)");
    println!();

    println!("{}", "Environment".bold().underline());
    println!("  {}: {}", "Working directory".dimmed(), report.environment.cwd.cyan());
    let set_vars: Vec<_> = report
        .environment
        .env_vars
        .iter()
        .filter(|v| v.value.is_some())
        .collect();
    if set_vars.is_empty() {
        println!("  {} No XDG/logging overrides set", "○".dimmed());
    } else {
        for var in set_vars {
            println!("  {}: {}", var.name.dimmed(), var.value.as_deref().unwrap_or("").cyan());
        }
    }

    Ok(())
}

fn print_optional(label: &str, value: Option<&str>, missing: &str) {
    print!("{}: ", label.dimmed());
    match value {
        Some(v) => println!("{}", v.cyan()),
        None => println!("{}", missing.yellow()),
    }
}

/// Offer to create a default user config file when none exists.
fn offer_config_creation() -> anyhow::Result<()> {
    let Some(config_dir) = config::user_config_dir() else {
        return Ok(());
    };
    let config_path = config_dir.join("config.yaml");

    if !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        return Ok(());
    }

    let create = Confirm::new("Create a default config file?")
        .with_default(false)
        .with_help_message(&format!("Will create {config_path}"))
        .prompt();

    // Declined or interrupted prompts leave everything as is.
    if let Ok(true) = create {
        std::fs::create_dir_all(&config_dir)?;
        let yaml = serde_saphyr::to_string(&Config::default())?;
        std::fs::write(&config_path, yaml)?;
        println!("  {} Created {}", "✓".green(), config_path.cyan());
    }

    Ok(())
}
