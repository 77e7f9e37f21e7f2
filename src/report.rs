//! Hierarchical test reports.
//!
//! A [`Report`] mirrors one node of the test tree. Leaves are tests; suites
//! only carry failures or errors of their own when a hook went wrong.

use serde::Serialize;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::ops::Add;
use std::time::Duration;

/// Outcome of a node. Ordered so that the worst status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
    Error,
}

impl Status {
    fn icon(self) -> &'static str {
        match self {
            Status::Success => "✓",
            Status::Failure => "✗",
            Status::Error => "⚠",
        }
    }
}

/// Tallies over a report subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub tests: usize,
    pub successes: usize,
    pub failures: usize,
    pub errors: usize,
}

impl Add for Counts {
    type Output = Counts;

    fn add(self, other: Counts) -> Counts {
        Counts {
            tests: self.tests + other.tests,
            successes: self.successes + other.successes,
            failures: self.failures + other.failures,
            errors: self.errors + other.errors,
        }
    }
}

impl std::iter::Sum for Counts {
    fn sum<I: Iterator<Item = Counts>>(iter: I) -> Counts {
        iter.fold(Counts::default(), Add::add)
    }
}

/// A harness error recorded on a report, with its cause chain as the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub description: String,
    pub trace: Vec<String>,
}

impl ErrorEntry {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            trace: Vec::new(),
        }
    }

    /// `error` and each of its sources become one trace line.
    pub fn from_error(description: impl Into<String>, error: &dyn std::error::Error) -> Self {
        let mut trace = vec![error.to_string()];
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            description: description.into(),
            trace,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub title: String,
    pub failures: Vec<String>,
    pub errors: Vec<ErrorEntry>,
    pub children: Vec<Report>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_test(&self) -> bool {
        self.children.is_empty()
    }

    pub fn add_error(&mut self, description: impl Into<String>, error: &dyn std::error::Error) {
        self.errors.push(ErrorEntry::from_error(description, error));
    }

    /// Status from this node's own failures and errors only.
    pub fn own_status(&self) -> Status {
        if !self.errors.is_empty() {
            Status::Error
        } else if !self.failures.is_empty() {
            Status::Failure
        } else {
            Status::Success
        }
    }

    /// Worst of the own status and every descendant's status.
    pub fn status(&self) -> Status {
        self.children
            .iter()
            .map(Report::status)
            .fold(self.own_status(), Status::max)
    }

    /// Only leaves count as tests. A suite counts as failed or errored only
    /// for problems of its own, added on top of its children's counts.
    pub fn counts(&self) -> Counts {
        let is_test = self.is_test();
        let is_error = !self.errors.is_empty();
        let is_failure = !is_error && !self.failures.is_empty();
        let own = Counts {
            tests: usize::from(is_test),
            successes: usize::from(is_test && !is_error && !is_failure),
            failures: usize::from(is_failure),
            errors: usize::from(is_error),
        };
        own + self.children.iter().map(Report::counts).sum()
    }

    /// Depth-first over leaves, yielding the titles from the root down.
    pub fn leaves(&self) -> Vec<(Vec<&str>, &Report)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, path: &mut Vec<&'a str>, out: &mut Vec<(Vec<&'a str>, &'a Report)>) {
        path.push(&self.title);
        if self.is_test() {
            out.push((path.clone(), self));
        } else {
            for child in &self.children {
                child.collect_leaves(path, out);
            }
        }
        path.pop();
    }
}

/// Renders reports as an indented tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer {
    pub show_successful: bool,
}

const INDENT: &str = "  ";

impl Printer {
    pub fn new(show_successful: bool) -> Self {
        Self { show_successful }
    }

    pub fn print(&self, report: &Report, out: &mut impl Write) -> io::Result<()> {
        self.print_at(report, 0, out)
    }

    fn print_at(&self, report: &Report, depth: usize, out: &mut impl Write) -> io::Result<()> {
        let indent = INDENT.repeat(depth);
        let status = report.status();
        if self.show_successful || status != Status::Success {
            if report.is_test() {
                writeln!(
                    out,
                    "{indent}{} {} ({:.2?})",
                    status.icon(),
                    report.title,
                    report.duration
                )?;
            } else {
                writeln!(out, "{indent}{} {}", status.icon(), report.title)?;
            }
        }

        for failure in &report.failures {
            let mut lines = failure.lines();
            writeln!(
                out,
                "{indent}{INDENT}{} {}",
                Status::Failure.icon(),
                lines.next().unwrap_or_default()
            )?;
            for line in lines {
                writeln!(out, "{indent}{INDENT}{INDENT}{line}")?;
            }
        }

        for error in &report.errors {
            writeln!(
                out,
                "{indent}{INDENT}{} {}",
                Status::Error.icon(),
                error.description
            )?;
            for line in &error.trace {
                writeln!(out, "{indent}{INDENT}{INDENT}{line}")?;
            }
        }

        for child in &report.children {
            self.print_at(child, depth + 1, out)?;
        }
        Ok(())
    }
}

/// Final one-line tally.
pub fn summary_line(counts: &Counts, files: usize) -> String {
    format!(
        "Ran {} total test(s) from {files} file(s). {} passed, {} failed, and {} produced an error.",
        counts.tests, counts.successes, counts.failures, counts.errors
    )
}

/// Worst status across several root reports; `Success` when there are none.
pub fn overall_status(reports: &[Report]) -> Status {
    reports
        .iter()
        .map(Report::status)
        .fold(Status::Success, Status::max)
}

/// Process exit code for a finished run.
pub fn exit_code(reports: &[Report]) -> i32 {
    match overall_status(reports) {
        Status::Success => 0,
        _ => 1,
    }
}

/// Format reports as JUnit XML: one `<testsuite>` per root report and one
/// `<testcase>` per leaf, named by its path below the root.
pub fn format_junit_xml(reports: &[Report], total_time: Duration) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let totals: Counts = reports.iter().map(Report::counts).sum();
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">",
        totals.tests,
        totals.failures,
        totals.errors,
        total_time.as_secs_f64()
    );

    for root in reports {
        let counts = root.counts();
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">",
            escape_xml(&root.title),
            counts.tests,
            counts.failures,
            counts.errors,
            root.duration.as_secs_f64()
        );

        for (path, leaf) in root.leaves() {
            let name = path.get(1..).unwrap_or_default().join(" › ");
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" time=\"{:.3}\">",
                escape_xml(if name.is_empty() { &root.title } else { &name }),
                leaf.duration.as_secs_f64()
            );
            if let Some(first) = leaf.failures.first() {
                let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(first));
                for failure in &leaf.failures {
                    let _ = writeln!(xml, "{}", escape_xml(failure));
                }
                xml.push_str("      </failure>\n");
            }
            for error in &leaf.errors {
                let _ = writeln!(
                    xml,
                    "      <error message=\"{}\">{}</error>",
                    escape_xml(&error.description),
                    escape_xml(&error.trace.join("\n"))
                );
            }
            xml.push_str("    </testcase>\n");
        }

        // Hook errors live on suites, which JUnit has no slot for.
        let suite_errors = collect_suite_errors(root);
        if !suite_errors.is_empty() {
            let _ = writeln!(
                xml,
                "    <system-err>{}</system-err>",
                escape_xml(&suite_errors.join("\n"))
            );
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

fn collect_suite_errors(report: &Report) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.is_test() {
        for error in &report.errors {
            lines.push(format!("{}: {}", report.title, error.description));
            lines.extend(error.trace.iter().cloned());
        }
        for child in &report.children {
            lines.extend(collect_suite_errors(child));
        }
    }
    lines
}

/// Escape special XML characters.
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
