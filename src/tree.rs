//! The suite/test-case tree.
//!
//! Trees are built independently per spec file and combined with
//! [`Suite::merge`], which folds same-named suites together at every depth.

use crate::check::Expectations;
use crate::error::HarnessError;
use crate::fixture::{EntrySet, Location};
use crate::sandbox::ContextRef;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A fallible, argument-less lifecycle hook.
pub type Hook = Box<dyn Fn() -> Result<(), HarnessError>>;

/// Lifecycle hooks of a suite. Any of them may be missing.
#[derive(Default)]
pub struct Hooks {
    pub before_all: Option<Hook>,
    pub before_each: Option<Hook>,
    pub after_each: Option<Hook>,
    pub after_all: Option<Hook>,
}

impl Hooks {
    /// Run `other`'s hooks after this set's, slot by slot.
    pub fn chain(self, other: Hooks) -> Hooks {
        Hooks {
            before_all: chain_hook(self.before_all, other.before_all),
            before_each: chain_hook(self.before_each, other.before_each),
            after_each: chain_hook(self.after_each, other.after_each),
            after_all: chain_hook(self.after_all, other.after_all),
        }
    }

    /// Run `cleanup`'s hooks after this set's, even when this set's fail.
    ///
    /// The first error wins.
    pub fn with_cleanup(self, cleanup: Hooks) -> Hooks {
        Hooks {
            before_all: ensure_hook(self.before_all, cleanup.before_all),
            before_each: ensure_hook(self.before_each, cleanup.before_each),
            after_each: ensure_hook(self.after_each, cleanup.after_each),
            after_all: ensure_hook(self.after_all, cleanup.after_all),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_all.is_none()
            && self.before_each.is_none()
            && self.after_each.is_none()
            && self.after_all.is_none()
    }
}

fn chain_hook(first: Option<Hook>, second: Option<Hook>) -> Option<Hook> {
    match (first, second) {
        (None, hook) | (hook, None) => hook,
        (Some(a), Some(b)) => Some(Box::new(move || {
            a()?;
            b()
        })),
    }
}

fn ensure_hook(first: Option<Hook>, cleanup: Option<Hook>) -> Option<Hook> {
    match (first, cleanup) {
        (None, hook) | (hook, None) => hook,
        (Some(a), Some(b)) => Some(Box::new(move || {
            let result = a();
            let cleaned = b();
            result.and(cleaned)
        })),
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_all", &self.before_all.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .field("after_all", &self.after_all.is_some())
            .finish()
    }
}

/// A step run inside a sandbox before a test case, or by a hook.
#[derive(Debug, Clone)]
pub enum Step {
    /// Run a command that must exit 0.
    Run(Vec<String>),
    /// Write a file relative to the sandbox root.
    WriteFile { path: PathBuf, contents: String },
    AddEntries(Location, EntrySet),
    ClearEntries(Location),
}

/// A leaf of the tree and the unit of pass/fail accounting.
#[derive(Debug)]
pub struct TestCase {
    pub name: String,
    pub context: ContextRef,
    /// Command line; never empty.
    pub command: Vec<String>,
    pub setup: Vec<Step>,
    /// Entries written before the command runs.
    pub define: Vec<(Location, EntrySet)>,
    pub expect: Expectations,
}

impl TestCase {
    /// Every location this case reads or writes through fixtures.
    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        let steps = self.setup.iter().filter_map(|step| match step {
            Step::AddEntries(location, _) | Step::ClearEntries(location) => Some(location),
            _ => None,
        });
        self.define
            .iter()
            .map(|(l, _)| l)
            .chain(self.expect.entries.iter().map(|(l, _)| l))
            .chain(steps)
    }
}

#[derive(Debug)]
pub struct Suite {
    pub name: String,
    pub children: Vec<TestNode>,
    pub hooks: Hooks,
}

impl Suite {
    pub fn new(name: impl Into<String>, children: Vec<TestNode>) -> Self {
        Self {
            name: name.into(),
            children,
            hooks: Hooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Combine independently built nodes into one tree.
    ///
    /// Test cases keep their relative order. The first suite with a given
    /// name stays where it is; later suites with that name contribute their
    /// children (and hooks) to it instead of appearing themselves. The same
    /// rule is applied to the children of every suite, at every depth.
    pub fn merge(nodes: impl IntoIterator<Item = TestNode>) -> Vec<TestNode> {
        let mut merged: Vec<TestNode> = Vec::new();
        let mut anchors: HashMap<String, usize> = HashMap::new();

        for node in nodes {
            match node {
                TestNode::Case(case) => merged.push(TestNode::Case(case)),
                TestNode::Suite(suite) => match anchors.get(&suite.name) {
                    Some(&index) => {
                        if let TestNode::Suite(anchor) = &mut merged[index] {
                            anchor.children.extend(suite.children);
                            let hooks = std::mem::take(&mut anchor.hooks);
                            anchor.hooks = hooks.chain(suite.hooks);
                        }
                    }
                    None => {
                        anchors.insert(suite.name.clone(), merged.len());
                        merged.push(TestNode::Suite(suite));
                    }
                },
            }
        }

        for node in &mut merged {
            if let TestNode::Suite(suite) = node {
                let children = std::mem::take(&mut suite.children);
                suite.children = Suite::merge(children);
            }
        }
        merged
    }
}

/// A node of the test tree: a suite or a single test case.
#[derive(Debug)]
pub enum TestNode {
    Suite(Suite),
    Case(TestCase),
}

impl TestNode {
    pub fn name(&self) -> &str {
        match self {
            TestNode::Suite(s) => &s.name,
            TestNode::Case(c) => &c.name,
        }
    }

    /// Number of test cases below (or at) this node.
    pub fn leaf_count(&self) -> usize {
        match self {
            TestNode::Suite(s) => s.children.iter().map(TestNode::leaf_count).sum(),
            TestNode::Case(_) => 1,
        }
    }

    /// Keep only test cases whose path (names joined by spaces) contains
    /// `filter`. Suites left without children are dropped.
    pub fn filter(self, filter: &str) -> Option<TestNode> {
        self.filter_under("", filter)
    }

    fn filter_under(self, parent: &str, filter: &str) -> Option<TestNode> {
        let path = if parent.is_empty() {
            self.name().to_string()
        } else {
            format!("{parent} {}", self.name())
        };
        match self {
            TestNode::Case(case) => path.contains(filter).then_some(TestNode::Case(case)),
            TestNode::Suite(mut suite) => {
                suite.children = std::mem::take(&mut suite.children)
                    .into_iter()
                    .filter_map(|child| child.filter_under(&path, filter))
                    .collect();
                (!suite.children.is_empty()).then_some(TestNode::Suite(suite))
            }
        }
    }
}

impl From<Suite> for TestNode {
    fn from(suite: Suite) -> Self {
        TestNode::Suite(suite)
    }
}

impl From<TestCase> for TestNode {
    fn from(case: TestCase) -> Self {
        TestNode::Case(case)
    }
}
