//! Logging setup: JSON lines to a log file, plus human-readable output on
//! stderr when `-v` is given.
//!
//! Nothing here writes to stdout. stdout carries the computed version and
//! must stay parseable by scripts.

use anyhow::Result;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Event;
use tracing::field::{Field, Visit};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "NEXTVER_LOG_PATH";
const ENV_LOG_DIR: &str = "NEXTVER_LOG_DIR";
const LOG_FILE_SUFFIX: &str = ".jsonl";

/// How the CLI wants logging set up.
#[derive(Clone, Debug)]
pub struct LogSettings {
    /// Written into every entry and used for the log file name.
    pub service: String,
    /// `log_dir` from the configuration.
    pub log_dir: Option<PathBuf>,
    pub quiet: bool,
    pub verbose: u8,
    /// `log_level` from the configuration, used when neither a flag nor
    /// `RUST_LOG` decides.
    pub default_level: String,
}

impl LogSettings {
    pub fn new(log_dir: Option<PathBuf>, quiet: bool, verbose: u8, default_level: &str) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            log_dir,
            quiet,
            verbose,
            default_level: default_level.to_string(),
        }
    }

    /// Priority: quiet flag > verbose flag > `RUST_LOG` > configured level.
    pub fn filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new("error");
        }
        match self.verbose {
            0 => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level)),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    }
}

/// Keeps the background log writer alive; drop it last.
pub struct LogGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber.
///
/// When no log file can be opened the JSON lines go to stderr instead, with
/// a warning.
pub fn init(settings: &LogSettings) -> Result<LogGuard> {
    let locations = LogLocations::from_env(settings.log_dir.clone());
    let (writer, worker) = match locations.resolve(&settings.service) {
        Ok(target) => target.open(),
        Err(err) => {
            eprintln!("Warning: {err}. Falling back to stderr logging.");
            tracing_appender::non_blocking(std::io::stderr())
        }
    };

    let console = (settings.verbose > 0 && !settings.quiet).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(false)
            .without_time()
            .compact()
    });

    tracing_subscriber::registry()
        .with(settings.filter())
        .with(JsonLines::new(settings.service.clone(), writer))
        .with(console)
        .try_init()?;

    tracing::debug!(service = %settings.service, "logging initialized");
    Ok(LogGuard { _worker: worker })
}

// ============================================================================
// JSON lines layer
// ============================================================================

/// Writes each event as one JSON object, merged with the fields of its
/// enclosing spans (outermost first, so inner spans win on collisions).
struct JsonLines<W> {
    service: String,
    writer: W,
}

impl<W> JsonLines<W> {
    const fn new(service: String, writer: W) -> Self {
        Self { service, writer }
    }

    fn entry<S>(&self, event: &Event<'_>, ctx: &LayerContext<'_, S>) -> Map<String, Value>
    where
        S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    {
        let meta = event.metadata();
        let mut entry = Map::new();
        entry.insert("timestamp".into(), rfc3339_utc(SystemTime::now()).into());
        entry.insert("level".into(), meta.level().as_str().to_lowercase().into());
        entry.insert("service".into(), self.service.clone().into());
        entry.insert("target".into(), meta.target().into());

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                entry.insert("span".into(), span.name().into());
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    entry.extend(fields.0.clone());
                }
            }
        }

        let mut fields = FieldMap::default();
        event.record(&mut fields);
        entry.extend(fields.0);
        entry
    }
}

impl<S, W> tracing_subscriber::Layer<S> for JsonLines<W>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(SpanFields(fields.0));
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldMap::default();
        values.record(&mut fields);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(existing) => existing.0.extend(fields.0),
            None => extensions.insert(SpanFields(fields.0)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let entry = Value::Object(self.entry(event, &ctx));
        let mut writer = self.writer.make_writer();
        if serde_json::to_writer(&mut writer, &entry).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

#[derive(Clone, Debug)]
struct SpanFields(Map<String, Value>);

#[derive(Default)]
struct FieldMap(Map<String, Value>);

impl FieldMap {
    fn put(&mut self, field: &Field, value: impl Into<Value>) {
        self.0.insert(field.name().to_string(), value.into());
    }
}

impl Visit for FieldMap {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.put(field, number);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` for `time`.
fn rfc3339_utc(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    let clock = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        clock / 3600,
        clock % 3600 / 60,
        clock % 60,
        since_epoch.subsec_millis()
    )
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
///
/// Counts from 0000-03-01 so that leap days fall at the end of each year.
const fn civil_from_days(days: u64) -> (u64, u64, u64) {
    const DAYS_PER_ERA: u64 = 146_097;
    let shifted = days + 719_468;
    let era = shifted / DAYS_PER_ERA;
    let day_of_era = shifted % DAYS_PER_ERA;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 { month_index + 3 } else { month_index - 9 };
    let year = year_of_era + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

// ============================================================================
// Log file location
// ============================================================================

/// Where the log file may go, in priority order.
#[derive(Clone, Debug, Default)]
struct LogLocations {
    /// `NEXTVER_LOG_PATH`: an exact file.
    path: Option<PathBuf>,
    /// `NEXTVER_LOG_DIR`
    dir: Option<PathBuf>,
    /// `log_dir` from the configuration.
    config_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LogTarget {
    dir: PathBuf,
    file_name: String,
}

impl LogLocations {
    fn from_env(config_dir: Option<PathBuf>) -> Self {
        Self {
            path: std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
            dir: std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
            config_dir,
        }
    }

    /// The first explicit location wins and must be usable. Without one,
    /// the user state or data directory is tried.
    fn resolve(&self, service: &str) -> Result<LogTarget, String> {
        if let Some(path) = &self.path {
            return LogTarget::from_path(path);
        }
        if let Some(dir) = self.dir.as_ref().or(self.config_dir.as_ref()) {
            return LogTarget::in_dir(dir.clone(), service);
        }

        let dirs = directories::ProjectDirs::from("", "", service)
            .ok_or_else(|| "no home directory for the default log location".to_string())?;
        let candidates = [
            dirs.state_dir().map(Path::to_path_buf),
            Some(dirs.data_local_dir().join("logs")),
        ];
        candidates
            .into_iter()
            .flatten()
            .find_map(|dir| LogTarget::in_dir(dir, service).ok())
            .ok_or_else(|| "no writable log directory found".to_string())
    }
}

impl LogTarget {
    fn in_dir(dir: PathBuf, service: &str) -> Result<Self, String> {
        let target = Self {
            dir,
            file_name: format!("{service}{LOG_FILE_SUFFIX}"),
        };
        target.ensure_writable()?;
        Ok(target)
    }

    fn from_path(path: &Path) -> Result<Self, String> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("{ENV_LOG_PATH} must end in a UTF-8 file name"))?
            .to_string();
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let target = Self { dir, file_name };
        target.ensure_writable()?;
        Ok(target)
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn ensure_writable(&self) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            format!("failed to create log directory {}: {e}", self.dir.display())
        })?;
        let path = self.path();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("failed to open log file {}: {e}", path.display()))?;
        Ok(())
    }

    /// Daily-rotated file behind a non-blocking writer.
    fn open(&self) -> (NonBlocking, WorkerGuard) {
        let appender = tracing_appender::rolling::daily(&self.dir, &self.file_name);
        tracing_appender::non_blocking(appender)
    }
}
