//! Turn parsed spec files into runnable test trees.
//!
//! Expansion resolves parameter matrices, interpolates `${name}` references,
//! compiles regexes, and wires shared sandboxes into suite hooks. Every
//! problem with a spec file surfaces here, before anything runs.

use crate::check::{Expectations, Matcher, OutputExpectation, StreamExpectation};
use crate::error::{ExpandError, HarnessError};
use crate::fixture::{EntrySet, Location};
use crate::interpolate::{Scope, interpolate, interpolate_tokens};
use crate::matrix::ParameterSet;
use crate::runner::run_steps;
use crate::sandbox::{ContextRef, SandboxSettings, SharedSandbox};
use crate::schema::{
    CaseSpec, EntriesAt, ExpectSpec, NodeSpec, OutputMatch, SandboxMode, SpecFile, StepSpec,
    StreamMatch, SuiteSpec,
};
use crate::tree::{Hook, Hooks, Step, Suite, TestCase, TestNode};
use regex::Regex;
use std::collections::HashMap;
use std::rc::Rc;

/// Supported spec file version.
pub const SPEC_VERSION: u32 = 1;

/// Sandbox in effect while expanding a subtree.
#[derive(Clone)]
enum Scoping {
    Fresh,
    Shared(Rc<SharedSandbox>),
}

/// Expands spec files against one suite configuration.
pub struct Expander {
    settings: Rc<SandboxSettings>,
    parameters: HashMap<String, Vec<Vec<String>>>,
}

impl Expander {
    pub fn new(settings: Rc<SandboxSettings>, parameters: HashMap<String, Vec<Vec<String>>>) -> Self {
        Self {
            settings,
            parameters,
        }
    }

    /// Expand a whole spec file into its top-level suite.
    pub fn expand(&self, spec: &SpecFile) -> Result<TestNode, ExpandError> {
        if spec.version != SPEC_VERSION {
            return Err(ExpandError::UnsupportedVersion(spec.version));
        }
        Ok(self
            .expand_suite(&spec.suite, &Scope::default(), &Scoping::Fresh)?
            .into())
    }

    fn expand_suite(
        &self,
        spec: &SuiteSpec,
        scope: &Scope,
        scoping: &Scoping,
    ) -> Result<Suite, ExpandError> {
        let params = self.parameter_set(spec)?;
        if params.is_empty() {
            return self.expand_instance(spec, spec.name.clone(), scope, scoping);
        }

        let mut instances = Vec::with_capacity(params.cardinality());
        for assignment in params.matrix() {
            let name = format!(
                "with parameters {}",
                assignment.describe(|tokens| format!("[{}]", tokens.join(" ")))
            );
            let scope = scope.shadowed_by(&assignment);
            instances.push(self.expand_instance(spec, name, &scope, scoping)?.into());
        }
        Ok(Suite::new(spec.name.clone(), instances))
    }

    /// Parameters named in `matrix`, then inline ones, in that order.
    fn parameter_set(&self, spec: &SuiteSpec) -> Result<ParameterSet<Vec<String>>, ExpandError> {
        let mut params = ParameterSet::new();
        for name in &spec.matrix {
            let values = self
                .parameters
                .get(name)
                .ok_or_else(|| ExpandError::UnknownParameter {
                    name: name.clone(),
                    context: format!("matrix of suite {:?}", spec.name),
                })?;
            params.insert(name.clone(), values.iter().cloned());
        }
        for param in &spec.parameters {
            params.insert(param.name.clone(), param.values.iter().cloned());
        }
        Ok(params)
    }

    /// One suite instance: a fixed scope and sandbox for all its children.
    fn expand_instance(
        &self,
        spec: &SuiteSpec,
        name: String,
        scope: &Scope,
        scoping: &Scoping,
    ) -> Result<Suite, ExpandError> {
        let (scoping, owned) = match (spec.sandbox, scoping) {
            (Some(SandboxMode::Shared), Scoping::Fresh) => (
                Scoping::Shared(Rc::new(SharedSandbox::new(Rc::clone(&self.settings)))),
                true,
            ),
            (Some(SandboxMode::Fresh), _) => (Scoping::Fresh, false),
            (_, scoping) => (scoping.clone(), false),
        };

        let mut children = Vec::with_capacity(spec.tests.len());
        let mut touched: Vec<Location> = Vec::new();
        for node in &spec.tests {
            match node {
                NodeSpec::Suite(inner) => {
                    children.push(self.expand_suite(inner, scope, &scoping)?.into());
                }
                NodeSpec::Case(case) => {
                    let case = self.expand_case(case, scope, &scoping)?;
                    for location in case.locations() {
                        if !touched.contains(location) {
                            touched.push(location.clone());
                        }
                    }
                    children.push(case.into());
                }
            }
        }

        let hooks = match &scoping {
            Scoping::Fresh => {
                let declared = [
                    &spec.before_all,
                    &spec.before_each,
                    &spec.after_each,
                    &spec.after_all,
                ];
                if declared.iter().any(|steps| !steps.is_empty()) {
                    return Err(ExpandError::HooksWithoutSandbox(spec.name.clone()));
                }
                Hooks::default()
            }
            Scoping::Shared(shared) => {
                let step_hook = |steps: &[StepSpec]| -> Result<Option<Hook>, ExpandError> {
                    let steps = expand_steps(steps, scope, &spec.name)?;
                    Ok((!steps.is_empty()).then(|| steps_hook(Rc::clone(shared), steps)))
                };
                let declared = Hooks {
                    before_all: step_hook(&spec.before_all)?,
                    before_each: step_hook(&spec.before_each)?,
                    after_each: step_hook(&spec.after_each)?,
                    after_all: step_hook(&spec.after_all)?,
                };

                let cleanup = Hooks {
                    after_each: (!touched.is_empty()).then(|| {
                        let steps = touched.into_iter().map(Step::ClearEntries).collect();
                        steps_hook(Rc::clone(shared), steps)
                    }),
                    after_all: owned.then(|| teardown_hook(Rc::clone(shared))),
                    ..Hooks::default()
                };
                declared.with_cleanup(cleanup)
            }
        };

        Ok(Suite::new(name, children).with_hooks(hooks))
    }

    fn expand_case(
        &self,
        spec: &CaseSpec,
        scope: &Scope,
        scoping: &Scoping,
    ) -> Result<TestCase, ExpandError> {
        let name = interpolate(&spec.name, scope)?;
        let command = interpolate_tokens(&spec.cmd, scope)?;
        if command.is_empty() {
            return Err(ExpandError::EmptyCommand(name));
        }
        let context = match scoping {
            Scoping::Fresh => ContextRef::Fresh(Rc::clone(&self.settings)),
            Scoping::Shared(shared) => ContextRef::Shared(Rc::clone(shared)),
        };
        Ok(TestCase {
            setup: expand_steps(&spec.setup, scope, &name)?,
            define: expand_entries(&spec.define, scope)?,
            expect: expand_expect(&spec.expect, scope, &name)?,
            name,
            context,
            command,
        })
    }
}

fn steps_hook(shared: Rc<SharedSandbox>, steps: Vec<Step>) -> Hook {
    Box::new(move || {
        shared
            .with_context(|ctx| run_steps(&steps, ctx))
            .map_err(HarnessError::SandboxUnavailable)?
    })
}

fn teardown_hook(shared: Rc<SharedSandbox>) -> Hook {
    Box::new(move || {
        shared.teardown();
        Ok(())
    })
}

fn expand_steps(steps: &[StepSpec], scope: &Scope, owner: &str) -> Result<Vec<Step>, ExpandError> {
    steps
        .iter()
        .map(|step| expand_step(step, scope, owner))
        .collect()
}

fn expand_step(step: &StepSpec, scope: &Scope, owner: &str) -> Result<Step, ExpandError> {
    let invalid = || ExpandError::InvalidStep(owner.to_string());
    let actions = [
        step.run.is_some(),
        step.write_file.is_some(),
        step.add_entries.is_some(),
        step.clear_entries.is_some(),
    ];
    if actions.iter().filter(|set| **set).count() != 1 {
        return Err(invalid());
    }

    if let Some(command) = &step.run {
        let command = interpolate_tokens(command, scope)?;
        if command.is_empty() {
            return Err(ExpandError::EmptyCommand(owner.to_string()));
        }
        return Ok(Step::Run(command));
    }
    if let Some(file) = &step.write_file {
        return Ok(Step::WriteFile {
            path: file.path.clone(),
            contents: file.contents.clone(),
        });
    }
    if let Some(at) = &step.add_entries {
        let location = Location::new(interpolate_tokens(&at.location, scope)?);
        return Ok(Step::AddEntries(location, at.entries.clone()));
    }
    match &step.clear_entries {
        Some(location) => Ok(Step::ClearEntries(Location::new(interpolate_tokens(
            location, scope,
        )?))),
        None => Err(invalid()),
    }
}

fn expand_entries(
    entries: &[EntriesAt],
    scope: &Scope,
) -> Result<Vec<(Location, EntrySet)>, ExpandError> {
    entries
        .iter()
        .map(|at| {
            let location = Location::new(interpolate_tokens(&at.location, scope)?);
            Ok((location, at.entries.clone()))
        })
        .collect()
}

fn expand_expect(spec: &ExpectSpec, scope: &Scope, owner: &str) -> Result<Expectations, ExpandError> {
    let stream = |m: &Option<StreamMatch>| -> Result<Option<StreamExpectation>, ExpandError> {
        m.as_ref()
            .map(|m| expand_stream(m, scope, owner))
            .transpose()
    };

    let output = match (&spec.output, &spec.stdout, &spec.stderr) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            return Err(ExpandError::ConflictingOutput(owner.to_string()));
        }
        (Some(output), None, None) => Some(OutputExpectation::Combined(expand_stream(
            output, scope, owner,
        )?)),
        (None, None, None) => None,
        (None, stdout, stderr) => Some(OutputExpectation::Split {
            stdout: stream(stdout)?,
            stderr: stream(stderr)?,
        }),
    };

    Ok(Expectations {
        exit_code: spec.exit,
        output,
        entries: expand_entries(&spec.entries, scope)?,
    })
}

fn expand_stream(
    spec: &StreamMatch,
    scope: &Scope,
    owner: &str,
) -> Result<StreamExpectation, ExpandError> {
    let matchers = spec
        .matchers()
        .iter()
        .map(|m| expand_matcher(m, scope, owner))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(StreamExpectation(matchers))
}

fn expand_matcher(spec: &OutputMatch, scope: &Scope, owner: &str) -> Result<Matcher, ExpandError> {
    let structured = match spec {
        OutputMatch::Exact(expected) => return Ok(Matcher::Exact(interpolate(expected, scope)?)),
        OutputMatch::Structured(structured) => structured,
    };
    match (&structured.equals, &structured.contains, &structured.regex) {
        (Some(expected), None, None) => Ok(Matcher::Exact(interpolate(expected, scope)?)),
        (None, Some(needle), None) => Ok(Matcher::Contains(interpolate(needle, scope)?)),
        (None, None, Some(pattern)) => {
            let pattern = interpolate(pattern, scope)?;
            Regex::new(&pattern)
                .map(Matcher::Pattern)
                .map_err(|source| ExpandError::InvalidRegex { pattern, source })
        }
        _ => Err(ExpandError::InvalidMatcher(owner.to_string())),
    }
}
