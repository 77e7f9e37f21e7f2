//! Expectations and the pure checks that compare them with what happened.
//!
//! Every check returns failure descriptions instead of stopping, so one test
//! case reports every mismatch it has.

use crate::fixture::{EntrySet, Location};
use crate::sandbox::{CommandOutput, OutputMode};
use regex::Regex;

/// One rule a captured stream must satisfy.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// The whole stream equals this string.
    Exact(String),
    /// The stream contains this string.
    Contains(String),
    /// The pattern matches somewhere in the stream.
    Pattern(Regex),
}

impl Matcher {
    pub fn is_match(&self, actual: &str) -> bool {
        match self {
            Matcher::Exact(expected) => actual == expected,
            Matcher::Contains(needle) => actual.contains(needle.as_str()),
            Matcher::Pattern(re) => re.is_match(actual),
        }
    }

    fn describe(&self) -> String {
        match self {
            Matcher::Exact(expected) => format!("{expected:?}"),
            Matcher::Contains(needle) => format!("a string containing {needle:?}"),
            Matcher::Pattern(re) => format!("a string matching /{}/", re.as_str()),
        }
    }
}

/// All matchers must hold for the stream.
#[derive(Debug, Clone)]
pub struct StreamExpectation(pub Vec<Matcher>);

impl StreamExpectation {
    pub fn exact(expected: impl Into<String>) -> Self {
        Self(vec![Matcher::Exact(expected.into())])
    }

    /// `None` when every matcher holds, otherwise a single failure naming
    /// the matchers that did not.
    fn check(&self, stream: &str, actual: &str) -> Option<String> {
        let unmet: Vec<String> = self
            .0
            .iter()
            .filter(|m| !m.is_match(actual))
            .map(Matcher::describe)
            .collect();
        if unmet.is_empty() {
            return None;
        }
        Some(format!(
            "expected {} {stream}, but got {actual:?}",
            unmet.join(" and ")
        ))
    }
}

/// What the command's output must look like.
#[derive(Debug, Clone)]
pub enum OutputExpectation {
    /// Stdout and stderr merged into one stream.
    Combined(StreamExpectation),
    /// Streams checked independently; `None` skips that stream.
    Split {
        stdout: Option<StreamExpectation>,
        stderr: Option<StreamExpectation>,
    },
}

/// Everything a test case may assert.
#[derive(Debug, Clone, Default)]
pub struct Expectations {
    /// Exit code to require; ignored when `None`.
    pub exit_code: Option<i32>,
    /// Output to require; ignored when `None`.
    pub output: Option<OutputExpectation>,
    /// Exact entry sets that must exist afterwards, per location.
    pub entries: Vec<(Location, EntrySet)>,
}

impl Expectations {
    /// How output must be captured for these expectations.
    pub fn output_mode(&self) -> OutputMode {
        match self.output {
            Some(OutputExpectation::Combined(_)) => OutputMode::Combined,
            _ => OutputMode::Split,
        }
    }

    /// Exit code and output checks, in that order.
    pub fn check_output(&self, output: &CommandOutput) -> Vec<String> {
        let mut failures = Vec::new();
        if let Some(expected) = self.exit_code {
            failures.extend(check_exit_code(expected, output));
        }
        if let Some(expected) = &self.output {
            failures.extend(check_streams(expected, output));
        }
        failures
    }
}

pub fn check_exit_code(expected: i32, output: &CommandOutput) -> Option<String> {
    match output.exit_code {
        Some(actual) if actual == expected => None,
        Some(actual) => Some(format!("expected exit code {expected}, but got {actual}")),
        None => {
            let cause = output
                .signal
                .map(|s| format!("signal {s}"))
                .unwrap_or_else(|| "an unknown cause".to_string());
            Some(format!(
                "expected exit code {expected}, but the process was terminated by {cause}"
            ))
        }
    }
}

/// One failure per mismatched stream.
pub fn check_streams(expected: &OutputExpectation, output: &CommandOutput) -> Vec<String> {
    match expected {
        OutputExpectation::Combined(stream) => stream
            .check("as output", &output.stdout)
            .into_iter()
            .collect(),
        OutputExpectation::Split { stdout, stderr } => [
            stdout
                .as_ref()
                .and_then(|s| s.check("on stdout", &output.stdout)),
            stderr
                .as_ref()
                .and_then(|s| s.check("on stderr", &output.stderr)),
        ]
        .into_iter()
        .flatten()
        .collect(),
    }
}

pub fn check_entries(location: &Location, expected: &EntrySet, actual: &EntrySet) -> Option<String> {
    if expected == actual {
        return None;
    }
    Some(format!(
        "expected entries {expected} at {location}, but found {actual}"
    ))
}
