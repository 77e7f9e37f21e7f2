//! Error types shared across the harness.
//!
//! Assertion failures are never errors: they are plain strings collected on a
//! report. Everything in this module is a harness error, which the runner turns
//! into an error entry on the report node where it happened.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while creating or using a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A filesystem operation inside the sandbox failed.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The process could not be started at all.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: Vec<String>,
        #[source]
        source: io::Error,
    },

    /// A command that must succeed exited unsuccessfully.
    #[error("command {command:?} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },

    /// An empty command line was handed to the sandbox.
    #[error("cannot execute an empty command line")]
    EmptyCommand,

    /// Wrapper symlinks need a platform with symlink support.
    #[error("symlinked wrappers are not supported on this platform")]
    Unsupported,
}

/// Errors raised by config-store fixture operations.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to write entry {name:?} at {location}")]
    Write {
        name: String,
        location: String,
        #[source]
        source: SandboxError,
    },

    #[error("failed to read entries at {location}")]
    Read {
        location: String,
        #[source]
        source: SandboxError,
    },

    #[error("failed to unset entry {name:?} at {location}")]
    Unset {
        name: String,
        location: String,
        #[source]
        source: SandboxError,
    },

    /// `git config --null --get-regex` produced a record without a newline.
    #[error("malformed config record at {location}: {record:?}")]
    Malformed { location: String, record: String },
}

/// Any fault raised while running hooks, steps, or test cases.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    /// A hook or step needed a sandbox that could not be created.
    #[error("sandbox unavailable")]
    SandboxUnavailable(#[source] SandboxError),

    /// Free-form failure raised by a hand-written hook.
    #[error("{0}")]
    Hook(String),
}

/// Errors raised while turning spec documents into a test tree.
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("unknown parameter {name:?} in {context}")]
    UnknownParameter { name: String, context: String },

    #[error("unclosed parameter reference in {0:?}")]
    Unclosed(String),

    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("test {0:?} has an empty command line")]
    EmptyCommand(String),

    #[error("test {0:?} declares both `output` and `stdout`/`stderr`")]
    ConflictingOutput(String),

    #[error("suite {0:?} declares hooks but has no shared sandbox")]
    HooksWithoutSandbox(String),

    #[error("step in {0:?} must declare exactly one action")]
    InvalidStep(String),

    #[error("output matcher in {0:?} must declare exactly one of `equals`, `contains`, `regex`")]
    InvalidMatcher(String),

    #[error("unsupported spec version {0} (expected 1)")]
    UnsupportedVersion(u32),
}

/// Errors raised while loading spec files and suite configuration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Expand(#[from] ExpandError),
}
