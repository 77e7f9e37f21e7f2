//! Conformance test harness for git alias management tools.
//!
//! Spec files describe suites of command-line tests. They are loaded and
//! expanded into a [`tree::TestNode`] tree, merged by suite name, run in
//! disposable sandboxes, and summarized as [`report::Report`] trees.

pub mod check;
pub mod error;
pub mod expand;
pub mod fixture;
pub mod interpolate;
pub mod loader;
pub mod matrix;
pub mod report;
pub mod runner;
pub mod sandbox;
pub mod schema;
pub mod tree;
