//! Schema definitions for aliastest spec files.
//!
//! This module defines the structure of suite configuration and spec files.
//! Specs are written in YAML (or TOML) and validated against these types.

use crate::fixture::EntrySet;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Suite-level configuration loaded from `aliastest.yaml` in the test root.
///
/// Provides defaults that apply to all spec files in the suite.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuiteConfig {
    /// Schema version (must match crate major version).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory containing the scripts under test, relative to this file.
    #[serde(default = "default_tool_dir")]
    pub tool_dir: PathBuf,

    /// Scripts in `tool_dir` that get `<stem>-abs` and `<stem>-rel` wrappers.
    #[serde(default = "default_scripts")]
    pub scripts: Vec<String>,

    /// Directory for test sandboxes. If set, sandboxes are created here instead of system temp.
    /// Use "local" for `.aliastest/<timestamp>/`, or specify a custom path.
    #[serde(default)]
    pub sandbox_dir: Option<SandboxDir>,

    /// Whether commands inherit the host environment (default: false).
    #[serde(default)]
    pub inherit_env: bool,

    /// Extra environment variables for every command.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Print successful tests as well as failing ones.
    #[serde(default)]
    pub show_successful: bool,

    /// Named parameter lists that spec files can expand with `matrix`.
    /// Each candidate value is a list of command-line tokens.
    #[serde(default)]
    pub parameters: HashMap<String, Vec<Vec<String>>>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            tool_dir: default_tool_dir(),
            scripts: default_scripts(),
            sandbox_dir: None,
            inherit_env: false,
            env: HashMap::new(),
            show_successful: false,
            parameters: HashMap::new(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_tool_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_scripts() -> Vec<String> {
    crate::sandbox::DEFAULT_SCRIPTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Directory configuration for test sandboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(from = "String", into = "String")]
pub enum SandboxDir {
    /// Use `.aliastest/<timestamp>/` in the test root directory.
    Local,
    /// Use a specific path for sandboxes.
    Path(PathBuf),
}

impl From<String> for SandboxDir {
    fn from(s: String) -> Self {
        if s == "local" {
            SandboxDir::Local
        } else {
            SandboxDir::Path(PathBuf::from(s))
        }
    }
}

impl From<SandboxDir> for String {
    fn from(dir: SandboxDir) -> String {
        match dir {
            SandboxDir::Local => "local".to_string(),
            SandboxDir::Path(p) => p.display().to_string(),
        }
    }
}

/// Root document for a spec file: a version plus one top-level suite.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpecFile {
    /// Schema version (must match crate major version).
    pub version: u32,

    #[serde(flatten)]
    pub suite: SuiteSpec,
}

/// Sandbox sharing mode for a suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Every test case gets its own sandbox (inherits the enclosing mode when unset).
    #[default]
    Fresh,
    /// One sandbox per suite instance, reused by its test cases in order.
    Shared,
}

/// A suite of tests and nested suites.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuiteSpec {
    /// Suite name; suites with equal names are merged across files.
    pub name: String,

    /// Sandbox mode for this suite and everything in it.
    #[serde(default)]
    pub sandbox: Option<SandboxMode>,

    /// Names of suite-config parameters to expand, in iteration order
    /// (the last one varies fastest).
    #[serde(default)]
    pub matrix: Vec<String>,

    /// Parameters defined inline, expanded after those named in `matrix`.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    /// Steps run once before the suite (needs a shared sandbox).
    #[serde(default)]
    pub before_all: Vec<StepSpec>,

    /// Steps run before every child (needs a shared sandbox).
    #[serde(default)]
    pub before_each: Vec<StepSpec>,

    /// Steps run after every child (needs a shared sandbox).
    #[serde(default)]
    pub after_each: Vec<StepSpec>,

    /// Steps run once after the suite (needs a shared sandbox).
    #[serde(default)]
    pub after_all: Vec<StepSpec>,

    /// Test cases and nested suites.
    pub tests: Vec<NodeSpec>,
}

/// An inline parameter and its candidate values.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    pub name: String,

    /// Candidate values, each a list of command-line tokens.
    pub values: Vec<Vec<String>>,
}

/// Either a nested suite (has `tests`) or a test case (has `cmd`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum NodeSpec {
    Suite(SuiteSpec),
    Case(CaseSpec),
}

/// A single test case.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CaseSpec {
    /// Test name.
    pub name: String,

    /// Command line to run from the sandbox repository. A token that is
    /// exactly `${param}` is replaced by all of the parameter's tokens.
    pub cmd: Vec<String>,

    /// Steps run inside the sandbox before `define`.
    #[serde(default)]
    pub setup: Vec<StepSpec>,

    /// Entries to write before running the command.
    #[serde(default)]
    pub define: Vec<EntriesAt>,

    /// Expected outcomes.
    #[serde(default)]
    pub expect: ExpectSpec,
}

/// An entry set at one storage location.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EntriesAt {
    /// Location flags, e.g. `["--global"]` or `["--file", "path"]`.
    pub location: Vec<String>,

    /// Alias names to bodies.
    pub entries: EntrySet,
}

/// Expected outcomes from a test execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExpectSpec {
    /// Expected exit code (not checked when unset).
    #[serde(default)]
    pub exit: Option<i32>,

    /// Expected output with stdout and stderr merged into one stream.
    /// Cannot be combined with `stdout`/`stderr`.
    #[serde(default)]
    pub output: Option<StreamMatch>,

    /// Expected stdout content.
    #[serde(default)]
    pub stdout: Option<StreamMatch>,

    /// Expected stderr content.
    #[serde(default)]
    pub stderr: Option<StreamMatch>,

    /// Exact entry sets required after the command, per location.
    #[serde(default)]
    pub entries: Vec<EntriesAt>,
}

/// One matcher, or a list that must all hold.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StreamMatch {
    One(OutputMatch),
    All(Vec<OutputMatch>),
}

impl StreamMatch {
    pub fn matchers(&self) -> &[OutputMatch] {
        match self {
            StreamMatch::One(m) => std::slice::from_ref(m),
            StreamMatch::All(ms) => ms,
        }
    }
}

/// Matching rules for a captured stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OutputMatch {
    /// Exact string match.
    Exact(String),
    /// Structured matching with one rule.
    Structured(OutputMatchStructured),
}

/// Structured output matching options. Exactly one should be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputMatchStructured {
    /// Exact string match.
    #[serde(default)]
    pub equals: Option<String>,

    /// Substring match.
    #[serde(default)]
    pub contains: Option<String>,

    /// Regular expression, searched anywhere in the stream.
    #[serde(default)]
    pub regex: Option<String>,
}

/// A setup or hook step.
///
/// Each step is a single-key map where the key determines the action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct StepSpec {
    /// Run a command (tokens) that must exit 0.
    #[serde(default)]
    pub run: Option<Vec<String>>,

    /// Write a file relative to the sandbox root.
    #[serde(default)]
    pub write_file: Option<WriteFile>,

    /// Write entries at a location.
    #[serde(default)]
    pub add_entries: Option<EntriesAt>,

    /// Remove every entry at a location.
    #[serde(default)]
    pub clear_entries: Option<Vec<String>>,
}

/// Write a file with specific contents.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WriteFile {
    /// Path to the file (relative to the sandbox root).
    pub path: PathBuf,

    /// File contents.
    pub contents: String,
}

/// Generate the JSON schema for spec files.
pub fn generate_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SpecFile)
}

/// Generate the JSON schema for the suite configuration file.
pub fn generate_config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(SuiteConfig)
}
