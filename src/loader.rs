//! Spec file loader.
//!
//! Loads and parses spec files from disk, expands them, and merges the
//! resulting suites into one tree.

use crate::error::LoadError;
use crate::expand::Expander;
use crate::sandbox::SandboxSettings;
use crate::schema::{SandboxDir, SpecFile, SuiteConfig};
use crate::tree::{Suite, TestNode};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The name of the suite configuration file.
pub const SUITE_CONFIG_FILENAME: &str = "aliastest.yaml";

/// Directory under the test root used by [`SandboxDir::Local`].
pub const LOCAL_SANDBOX_DIR: &str = ".aliastest";

/// Load a spec from a file path.
pub fn load_spec(path: &Path) -> Result<SpecFile, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path)?;

    match ext {
        "yaml" | "yml" => Ok(serde_yaml::from_str(&contents)?),
        "toml" => Ok(toml::from_str(&contents)?),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

/// Load suite configuration from a directory.
///
/// Looks for `aliastest.yaml` in the given directory.
/// Returns `None` if the file doesn't exist, `Err` if it exists but is invalid.
pub fn load_suite_config(dir: &Path) -> Result<Option<SuiteConfig>, LoadError> {
    let config_path = dir.join(SUITE_CONFIG_FILENAME);

    if !config_path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&config_path)?;
    let config: SuiteConfig = serde_yaml::from_str(&contents)?;
    Ok(Some(config))
}

/// Sandbox settings for a suite rooted at `root`.
///
/// `tool_dir` and relative sandbox paths are resolved against `root`.
pub fn sandbox_settings(config: &SuiteConfig, root: &Path) -> SandboxSettings {
    let sandbox_root = config.sandbox_dir.as_ref().map(|dir| match dir {
        SandboxDir::Local => {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            root.join(LOCAL_SANDBOX_DIR).join(stamp.to_string())
        }
        SandboxDir::Path(path) => root.join(path),
    });
    SandboxSettings {
        tool_dir: root.join(&config.tool_dir),
        scripts: config.scripts.clone(),
        sandbox_root,
        inherit_env: config.inherit_env,
        env: config.env.clone(),
    }
}

/// Find all spec files in a directory or return the single file.
///
/// Files and directories whose names start with `.` or `_` are skipped, as
/// is the suite config file.
pub fn find_specs(path: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut specs = Vec::new();
    collect_specs_recursive(path, &mut specs)?;
    specs.sort();
    Ok(specs)
}

fn collect_specs_recursive(dir: &Path, specs: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let hidden = path
            .file_name()
            .and_then(|f| f.to_str())
            .is_some_and(|f| f.starts_with('.') || f.starts_with('_'));
        if hidden {
            continue;
        }

        if path.is_dir() {
            collect_specs_recursive(&path, specs)?;
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str())
            && (ext == "yaml" || ext == "yml" || ext == "toml")
        {
            if path.file_name().is_some_and(|f| f == SUITE_CONFIG_FILENAME) {
                continue;
            }
            specs.push(path);
        }
    }
    Ok(())
}

/// Everything loaded from a set of spec files.
#[derive(Debug, Default)]
pub struct LoadedSuites {
    /// Merged top-level nodes.
    pub nodes: Vec<TestNode>,
    /// Number of spec files that loaded successfully.
    pub files: usize,
    /// Files that failed to load or expand.
    pub errors: Vec<(PathBuf, LoadError)>,
}

/// Load, expand, and merge spec files in order.
///
/// Each file's suite is merged into the tree as soon as it is loaded. A file
/// that fails is recorded and skipped; the rest still load.
pub fn load_suites(paths: &[PathBuf], expander: &Expander) -> LoadedSuites {
    let mut loaded = LoadedSuites::default();
    for path in paths {
        let node = load_spec(path).and_then(|spec| expander.expand(&spec).map_err(LoadError::from));
        match node {
            Ok(node) => {
                debug!(path = %path.display(), tests = node.leaf_count(), "loaded spec file");
                let nodes = std::mem::take(&mut loaded.nodes);
                loaded.nodes = Suite::merge(nodes.into_iter().chain([node]));
                loaded.files += 1;
            }
            Err(e) => loaded.errors.push((path.clone(), e)),
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tempfile::tempdir;

    const ADD_SPEC: &str = r#"
version: 1
name: add
tests:
  - name: adds an alias
    cmd: [git-alias.sh, --global, add, foo, diff]
"#;

    fn expander() -> Expander {
        Expander::new(Rc::new(SandboxSettings::new(".")), HashMap::new())
    }

    #[test]
    fn load_valid_spec() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("add.yaml");
        std::fs::write(&path, ADD_SPEC).unwrap();

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.version, 1);
        assert_eq!(spec.suite.name, "add");
        assert_eq!(spec.suite.tests.len(), 1);
    }

    #[test]
    fn load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "invalid: [yaml: {").unwrap();

        let result = load_spec(&path);
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn unsupported_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.txt");
        std::fs::write(&path, "").unwrap();

        let result = load_spec(&path);
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn load_valid_toml_spec() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("show.toml");
        std::fs::write(
            &path,
            r#"
version = 1
name = "show"

[[tests]]
name = "empty"
cmd = ["git-alias.sh", "--global", "show"]

[tests.expect]
exit = 0
"#,
        )
        .unwrap();

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.suite.name, "show");
        assert_eq!(spec.suite.tests.len(), 1);
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "invalid = [toml").unwrap();

        let result = load_spec(&path);
        assert!(matches!(result, Err(LoadError::Toml(_))));
    }

    #[test]
    fn find_specs_in_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("b.yml"), "").unwrap();
        std::fs::write(dir.path().join("c.toml"), "").unwrap();
        std::fs::write(dir.path().join("d.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/e.yaml"), "").unwrap();

        let specs = find_specs(dir.path()).unwrap();
        assert_eq!(specs.len(), 4);
        assert!(specs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn find_specs_skips_config_and_private_names() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join(SUITE_CONFIG_FILENAME), "version: 1").unwrap();
        std::fs::write(dir.path().join("_helpers.yaml"), "").unwrap();
        std::fs::create_dir(dir.path().join(".aliastest")).unwrap();
        std::fs::write(dir.path().join(".aliastest/x.yaml"), "").unwrap();

        let specs = find_specs(dir.path()).unwrap();
        assert_eq!(specs, vec![dir.path().join("a.yaml")]);
    }

    #[test]
    fn load_suite_config_not_found() {
        let dir = tempdir().unwrap();
        let result = load_suite_config(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn load_suite_config_valid() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SUITE_CONFIG_FILENAME),
            r#"
version: 1
tool_dir: ../bin
env:
  MY_VAR: my_value
"#,
        )
        .unwrap();

        let config = load_suite_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.env.get("MY_VAR"), Some(&"my_value".to_string()));

        let settings = sandbox_settings(&config, dir.path());
        assert_eq!(settings.tool_dir, dir.path().join("../bin"));
        assert!(settings.sandbox_root.is_none());
    }

    #[test]
    fn local_sandbox_dir_lives_under_the_root() {
        let dir = tempdir().unwrap();
        let config = SuiteConfig {
            sandbox_dir: Some(SandboxDir::Local),
            ..SuiteConfig::default()
        };
        let settings = sandbox_settings(&config, dir.path());
        let sandbox_root = settings.sandbox_root.unwrap();
        assert!(sandbox_root.starts_with(dir.path().join(LOCAL_SANDBOX_DIR)));
    }

    #[test]
    fn load_suite_config_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SUITE_CONFIG_FILENAME), "invalid: [yaml: {").unwrap();

        let result = load_suite_config(dir.path());
        assert!(matches!(result, Err(LoadError::Yaml(_))));
    }

    #[test]
    fn suites_from_several_files_are_merged() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), ADD_SPEC).unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            r#"
version: 1
name: add
tests:
  - name: rejects a missing body
    cmd: [git-alias.sh, --global, add, foo]
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("c.yaml"), "version: 1\nname: [oops\n").unwrap();

        let paths = find_specs(dir.path()).unwrap();
        let loaded = load_suites(&paths, &expander());
        assert_eq!(loaded.files, 2);
        assert_eq!(loaded.errors.len(), 1);
        assert_eq!(loaded.errors[0].0, dir.path().join("c.yaml"));
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.nodes[0].name(), "add");
        assert_eq!(loaded.nodes[0].leaf_count(), 2);
    }

    #[test]
    fn expansion_errors_are_load_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "version: 1\nname: s\nmatrix: [missing]\ntests: []\n").unwrap();

        let loaded = load_suites(&[path], &expander());
        assert!(matches!(loaded.errors[0].1, LoadError::Expand(_)));
    }
}
