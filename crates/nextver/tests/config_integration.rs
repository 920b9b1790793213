//! Configuration integration tests.
//!
//! These tests verify config discovery, format parsing, and precedence
//! from an end-to-end perspective, reading back what `doctor --json`
//! reports as loaded.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Returns a Command configured to run our binary.
#[allow(deprecated)]
fn cmd() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap()
}

/// A scratch project directory isolated from the user's own config and
/// log locations.
struct Sandbox {
    root: TempDir,
    home: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            home: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn doctor_in(&self, relative: &str) -> Command {
        let mut cmd = cmd();
        cmd.env("XDG_CONFIG_HOME", self.home.path().join("config"))
            .env("NEXTVER_LOG_DIR", self.home.path().join("logs"))
            .arg("-C")
            .arg(self.path().join(relative))
            .args(["doctor", "--json"]);
        cmd
    }

    fn report_in(&self, relative: &str) -> serde_json::Value {
        let output = self.doctor_in(relative).assert().success();
        serde_json::from_slice(&output.get_output().stdout).expect("doctor --json output")
    }

    fn report(&self) -> serde_json::Value {
        self.report_in("")
    }
}

fn sources(report: &serde_json::Value) -> Vec<String> {
    report["config"]["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect()
}

fn single_source_name(report: &serde_json::Value) -> String {
    let sources = sources(report);
    assert_eq!(sources.len(), 1, "expected one config source: {sources:?}");
    Path::new(&sources[0])
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

// =============================================================================
// Config File Discovery
// =============================================================================

#[test]
fn runs_without_config_file() {
    let sandbox = Sandbox::new();
    let report = sandbox.report();
    assert!(sources(&report).is_empty());
    assert_eq!(report["config"]["tag_prefix"], "v");
    assert_eq!(report["config"]["initial_version"], "0.1.0");
}

#[test]
fn discovers_dotfile_config_in_current_dir() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[version]\ntag_prefix = \"release-\"\n");

    let report = sandbox.report();
    assert_eq!(single_source_name(&report), ".nextver.toml");
    assert_eq!(report["config"]["tag_prefix"], "release-");
}

#[test]
fn discovers_regular_config_in_current_dir() {
    let sandbox = Sandbox::new();
    sandbox.write("nextver.toml", "[version]\ninitial_version = \"1.0.0\"\n");

    let report = sandbox.report();
    assert_eq!(single_source_name(&report), "nextver.toml");
    assert_eq!(report["config"]["initial_version"], "1.0.0");
}

#[test]
fn discovers_config_in_parent_directory() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"parent\"\n");
    fs::create_dir_all(sandbox.path().join("nested/deep")).unwrap();

    let report = sandbox.report_in("nested/deep");
    assert_eq!(report["cache"]["cache_id"], "parent");
}

#[test]
fn dotfile_takes_precedence_over_regular_name() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"dotfile\"\n");
    sandbox.write("nextver.toml", "[cache]\ncache_id = \"regular\"\n");

    let report = sandbox.report();
    assert_eq!(report["cache"]["cache_id"], "dotfile");
}

// =============================================================================
// Config Format Parsing
// =============================================================================

#[test]
fn parses_yaml_config() {
    let sandbox = Sandbox::new();
    sandbox.write(
        ".nextver.yaml",
        "cache:\n  lock_timeout_ms: 2500\n  enabled: false\n",
    );

    let report = sandbox.report();
    assert_eq!(report["cache"]["lock_timeout_ms"], 2500);
    assert_eq!(report["cache"]["enabled"], false);
}

#[test]
fn parses_yml_config() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.yml", "version:\n  tag_prefix: ''\n");

    assert_eq!(sandbox.report()["config"]["tag_prefix"], "");
}

#[test]
fn parses_json_config() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.json", r#"{"cache": {"cache_id": "from-json"}}"#);

    assert_eq!(sandbox.report()["cache"]["cache_id"], "from-json");
}

// =============================================================================
// Config Precedence
// =============================================================================

#[test]
fn closer_config_takes_precedence() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"outer\"\n");
    sandbox.write("project/.nextver.toml", "[cache]\ncache_id = \"inner\"\n");

    let report = sandbox.report_in("project");
    assert_eq!(report["cache"]["cache_id"], "inner");
}

#[test]
fn toml_preferred_over_yaml_in_same_directory() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"toml\"\n");
    sandbox.write(".nextver.yaml", "cache:\n  cache_id: yaml\n");

    let report = sandbox.report();
    assert_eq!(single_source_name(&report), ".nextver.toml");
    assert_eq!(report["cache"]["cache_id"], "toml");
}

#[test]
fn explicit_config_file_overrides_discovered() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"discovered\"\n");
    sandbox.write("ci/nextver-ci.toml", "[cache]\ncache_id = \"ci\"\n");

    let output = sandbox
        .doctor_in("")
        .arg("--config")
        .arg(sandbox.path().join("ci/nextver-ci.toml"))
        .assert()
        .success();
    let report: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();

    assert_eq!(report["cache"]["cache_id"], "ci");
    let sources = sources(&report);
    assert_eq!(sources.len(), 2);
    assert!(sources[1].ends_with("nextver-ci.toml"));
}

#[test]
fn invalid_cache_id_is_reported_by_doctor() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[cache]\ncache_id = \"no/slashes\"\n");

    assert_eq!(sandbox.report()["cache"]["cache_id_valid"], false);
}

// =============================================================================
// Error Cases
// =============================================================================

#[test]
fn invalid_toml_config_shows_error() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "this is not valid toml [[[");

    sandbox
        .doctor_in("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}

#[test]
fn invalid_yaml_config_shows_error() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.yaml", "invalid:\n  yaml\n content:\n[broken");

    sandbox.doctor_in("").assert().failure();
}

#[test]
fn invalid_initial_version_shows_error() {
    let sandbox = Sandbox::new();
    sandbox.write(".nextver.toml", "[version]\ninitial_version = \"one\"\n");

    sandbox.doctor_in("").assert().failure();
}

#[test]
fn unknown_config_field_is_ignored() {
    let sandbox = Sandbox::new();
    sandbox.write(
        ".nextver.toml",
        "log_level = \"info\"\nunknown_field = \"ignored\"\nanother_unknown = 42\n",
    );

    sandbox.doctor_in("").assert().success();
}

// =============================================================================
// Boundary Marker Tests
// =============================================================================

#[test]
fn git_boundary_stops_config_search() {
    let sandbox = Sandbox::new();
    sandbox.write("parent/.nextver.toml", "[cache]\ncache_id = \"outside\"\n");
    fs::create_dir_all(sandbox.path().join("parent/repo/.git")).unwrap();
    fs::create_dir_all(sandbox.path().join("parent/repo/src")).unwrap();

    let report = sandbox.report_in("parent/repo/src");
    assert!(sources(&report).is_empty());
    assert_eq!(report["cache"]["cache_id"], "default");
}

#[test]
fn config_in_same_dir_as_git_is_found() {
    let sandbox = Sandbox::new();
    fs::create_dir_all(sandbox.path().join("repo/.git")).unwrap();
    fs::create_dir_all(sandbox.path().join("repo/src")).unwrap();
    sandbox.write("repo/.nextver.toml", "[cache]\ncache_id = \"repo\"\n");

    assert_eq!(sandbox.report_in("repo/src")["cache"]["cache_id"], "repo");
}
