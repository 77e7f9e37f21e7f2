//! End-to-end tests of the `aliastest` binary against a small stand-in tool.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// A minimal `git-alias.sh`: `[location] add <name> <body...>` and
/// `[location] show`, printing shell-format lines.
const STUB_TOOL: &str = r#"#!/bin/sh
loc=""
case "$1" in
  --global|--local|--system) loc="$1"; shift ;;
  --file) loc="--file $2"; shift 2 ;;
esac
cmd="$1"
[ $# -gt 0 ] && shift
case "$cmd" in
  add)
    if [ $# -lt 2 ]; then
      echo "error: missing body" >&2
      echo "Usage: git alias [location flag] add <name> <body>" >&2
      exit 1
    fi
    name="$1"; shift
    exec git config $loc "alias.$name" "$*"
    ;;
  show)
    git config $loc --get-regex '^alias\.' | while read -r key body; do
      printf "git alias add %s '%s'\n" "${key#alias.}" "$body"
    done
    ;;
  *)
    echo "Usage: git alias [location flag] <add|remove|show>" >&2
    exit 1
    ;;
esac
"#;

const ADD_SPEC: &str = r#"
version: 1
name: add
tests:
  - name: supports a single argument as the body of an alias
    cmd: [git-alias.sh, --global, add, foo, diff a b]
    expect:
      exit: 0
      output: ""
      entries:
        - location: [--global]
          entries: {foo: diff a b}
  - name: fails without a body
    cmd: [git-alias.sh, --global, add, foo]
    expect:
      exit: 1
      stdout: ""
      stderr:
        - regex: '\bbody\b'
        - regex: '(?m)^Usage: git alias\b'
"#;

fn aliastest_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_aliastest"))
}

/// A test root holding the stub tool and the given spec files.
fn suite_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let tool = dir.path().join("git-alias.sh");
    fs::write(&tool, STUB_TOOL).unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

fn run(dir: &Path, extra: &[&str]) -> Output {
    aliastest_cmd()
        .arg("run")
        .arg(dir)
        .args(extra)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn describe(output: &Output) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn passing_suite_exits_zero_with_summary() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC)]);
    let output = run(dir.path(), &[]);

    assert!(output.status.success(), "{}", describe(&output));
    assert!(stdout(&output).contains(
        "Ran 2 total test(s) from 1 file(s). 2 passed, 0 failed, and 0 produced an error."
    ));
    assert!(!stdout(&output).contains("✓"), "successes are hidden by default");
}

#[test]
fn show_successful_prints_passing_tests() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC)]);
    let output = run(dir.path(), &["--show-successful"]);

    assert!(output.status.success(), "{}", describe(&output));
    let out = stdout(&output);
    assert!(out.contains("✓ add"));
    assert!(out.contains("✓ fails without a body"));
}

#[test]
fn failing_expectation_exits_one_and_names_the_test() {
    let spec = r#"
version: 1
name: show
tests:
  - name: shows nothing on an empty location
    cmd: [git-alias.sh, --global, show]
    define:
      - location: [--global]
        entries: {foo: diff}
    expect:
      exit: 0
      stdout: ""
"#;
    let dir = suite_dir(&[("show.yaml", spec)]);
    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    let out = stdout(&output);
    assert!(out.contains("✗ shows nothing on an empty location"));
    assert!(out.contains("git alias add foo 'diff'"));
    assert!(out.contains("0 passed, 1 failed"));
}

#[test]
fn matrix_parameters_come_from_suite_config() {
    let config = r#"
parameters:
  location-flags:
    - [--global]
    - [--file, ../custom-config]
"#;
    let spec = r#"
version: 1
name: show
matrix: [location-flags]
tests:
  - name: shows defined entries
    cmd: [git-alias.sh, "${location-flags}", show]
    define:
      - location: ["${location-flags}"]
        entries: {foo: diff a b}
    expect:
      exit: 0
      stdout: "git alias add foo 'diff a b'\n"
"#;
    let dir = suite_dir(&[("aliastest.yaml", config), ("show.yaml", spec)]);
    let output = run(dir.path(), &["--show-successful"]);

    assert!(output.status.success(), "{}", describe(&output));
    let out = stdout(&output);
    assert!(out.contains("with parameters location-flags=[--global]"));
    assert!(out.contains("with parameters location-flags=[--file ../custom-config]"));
    assert!(out.contains("Ran 2 total test(s)"));
}

#[test]
fn same_named_suites_from_several_files_are_merged() {
    let more = r#"
version: 1
name: add
tests:
  - name: accepts several words as the body
    cmd: [git-alias.sh, --global, add, foo, log, --oneline]
    expect:
      exit: 0
      entries:
        - location: [--global]
          entries: {foo: log --oneline}
"#;
    let dir = suite_dir(&[("add.yaml", ADD_SPEC), ("more.yaml", more)]);
    let output = run(dir.path(), &["-o", "json"]);

    assert!(output.status.success(), "{}", describe(&output));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["files"], 2);
    assert_eq!(json["counts"]["tests"], 3);
    assert_eq!(json["status"], "success");
    let reports = json["reports"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["title"], "add");
    assert_eq!(reports[0]["children"].as_array().unwrap().len(), 3);
}

#[test]
fn filter_selects_tests_by_path() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC)]);
    let output = run(dir.path(), &["--filter", "without a body"]);

    assert!(output.status.success(), "{}", describe(&output));
    assert!(stdout(&output).contains("Ran 1 total test(s)"));
}

#[test]
fn junit_output_lists_leaves() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC)]);
    let output = run(dir.path(), &["--output", "junit"]);

    assert!(output.status.success(), "{}", describe(&output));
    let xml = stdout(&output);
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<testsuite name=\"add\" tests=\"2\" failures=\"0\""));
    assert!(xml.contains("<testcase name=\"fails without a body\""));
}

#[test]
fn load_error_fails_the_run_but_other_files_still_run() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC), ("broken.yaml", "version: 1\nname: [x\n")]);
    let output = run(dir.path(), &[]);

    assert_eq!(output.status.code(), Some(1), "{}", describe(&output));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load"));
    assert!(stdout(&output).contains("2 passed"));
}

#[test]
fn missing_specs_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = run(dir.path(), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No spec files found"));
}

#[test]
fn validate_counts_tests_without_running() {
    let dir = suite_dir(&[("add.yaml", ADD_SPEC)]);
    let output = aliastest_cmd()
        .arg("validate")
        .arg(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", describe(&output));
    let out = stdout(&output);
    assert!(out.contains("✓ add (2 tests)"));
    assert!(out.contains("All 1 spec(s) valid"));
}

#[test]
fn validate_rejects_unknown_parameters() {
    let spec = "version: 1\nname: s\nmatrix: [nope]\ntests: []\n";
    let dir = suite_dir(&[("s.yaml", spec)]);
    let output = aliastest_cmd()
        .arg("validate")
        .arg(dir.path())
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown parameter \"nope\""));
}

#[test]
fn init_writes_a_valid_template_once() {
    let dir = suite_dir(&[]);
    let path = dir.path().join("specs/example.yaml");

    let output = aliastest_cmd().arg("init").arg(&path).output().unwrap();
    assert!(output.status.success(), "{}", describe(&output));
    assert!(path.exists());

    let output = aliastest_cmd().arg("init").arg(&path).output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let output = aliastest_cmd()
        .arg("run")
        .arg(&path)
        .arg("--tool-dir")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", describe(&output));
}

#[test]
fn schema_is_json() {
    let output = aliastest_cmd().arg("schema").output().unwrap();
    assert!(output.status.success());
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["definitions"]["SuiteSpec"].is_object());

    let output = aliastest_cmd().args(["schema", "--config"]).output().unwrap();
    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(schema["properties"]["parameters"].is_object());
}
