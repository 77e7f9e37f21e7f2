//! Test execution engine.
//!
//! Walks a test tree depth-first, one node at a time, and mirrors it into a
//! [`Report`] tree. Assertion failures are collected; harness errors are
//! caught where they happen and recorded, so the run always completes.

use crate::check::{self, Expectations};
use crate::error::HarnessError;
use crate::fixture::ConfigFixture;
use crate::report::Report;
use crate::sandbox::SandboxContext;
use crate::tree::{Hook, Step, Suite, TestCase, TestNode};
use std::time::Instant;
use tracing::debug;

/// Run every top-level node, each into its own root report.
pub fn run_all(nodes: &[TestNode]) -> Vec<Report> {
    nodes
        .iter()
        .map(|node| {
            let mut report = Report::new(node.name());
            run_node(node, &mut report);
            report
        })
        .collect()
}

/// Run one node into an already created report.
pub fn run_node(node: &TestNode, report: &mut Report) {
    let start = Instant::now();
    match node {
        TestNode::Suite(suite) => run_suite(suite, report),
        TestNode::Case(case) => run_case(case, report),
    }
    report.duration = start.elapsed();
}

fn run_suite(suite: &Suite, report: &mut Report) {
    debug!(suite = %suite.name, "running suite");
    run_hook(suite.hooks.before_all.as_ref(), "before_all", report);

    for child in &suite.children {
        run_hook(suite.hooks.before_each.as_ref(), "before_each", report);

        let mut child_report = Report::new(child.name());
        run_node(child, &mut child_report);
        report.children.push(child_report);

        run_hook(suite.hooks.after_each.as_ref(), "after_each", report);
    }

    run_hook(suite.hooks.after_all.as_ref(), "after_all", report);
}

fn run_hook(hook: Option<&Hook>, label: &str, report: &mut Report) {
    if let Some(hook) = hook
        && let Err(e) = hook()
    {
        report.add_error(format!("Error occurred in {label}."), &e);
    }
}

fn run_case(case: &TestCase, report: &mut Report) {
    debug!(test = %case.name, command = ?case.command, "running test case");
    match case.context.with_context(|ctx| execute_case(case, ctx)) {
        Ok(Ok(failures)) => report.failures.extend(failures),
        Ok(Err(e)) => report.add_error("Error occurred while running the test case.", &e),
        Err(e) => report.add_error("Failed to create sandbox.", &e),
    }
}

/// Seed, run, and check one test case. Only harness errors are returned as
/// `Err`; assertion failures come back as the `Ok` list.
fn execute_case(case: &TestCase, ctx: &SandboxContext) -> Result<Vec<String>, HarnessError> {
    run_steps(&case.setup, ctx)?;
    for (location, entries) in &case.define {
        ConfigFixture::new(ctx, location).add_entries(entries)?;
    }

    let output = ctx.execute(&case.command, case.expect.output_mode())?;

    let mut failures = case.expect.check_output(&output);
    failures.extend(check_entries(&case.expect, ctx)?);
    Ok(failures)
}

fn check_entries(expect: &Expectations, ctx: &SandboxContext) -> Result<Vec<String>, HarnessError> {
    let mut failures = Vec::new();
    for (location, expected) in &expect.entries {
        let actual = ConfigFixture::new(ctx, location).get_entries()?;
        failures.extend(check::check_entries(location, expected, &actual));
    }
    Ok(failures)
}

/// Run steps in order, stopping at the first failure.
pub fn run_steps(steps: &[Step], ctx: &SandboxContext) -> Result<(), HarnessError> {
    for step in steps {
        run_step(step, ctx)?;
    }
    Ok(())
}

fn run_step(step: &Step, ctx: &SandboxContext) -> Result<(), HarnessError> {
    match step {
        Step::Run(command) => {
            ctx.execute_checked(command)?;
        }
        Step::WriteFile { path, contents } => {
            let path = ctx.resolve_path(path);
            let io_error = |action, source| crate::error::SandboxError::Io {
                action,
                path: path.clone(),
                source,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error("create parent of", e))?;
            }
            std::fs::write(&path, contents).map_err(|e| io_error("write", e))?;
        }
        Step::AddEntries(location, entries) => {
            ConfigFixture::new(ctx, location).add_entries(entries)?;
        }
        Step::ClearEntries(location) => {
            ConfigFixture::new(ctx, location).clear_entries()?;
        }
    }
    Ok(())
}
