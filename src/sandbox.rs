//! Disposable sandboxes for running the tool under test.
//!
//! Each [`SandboxContext`] owns a private directory tree:
//!
//! ```text
//! <root>/
//!   bin/                 <stem>-abs and <stem>-rel wrappers per script
//!   repo/                fresh `git init` repository, used as the working directory
//!   gitconfig-global     GIT_CONFIG_GLOBAL
//!   gitconfig-system     GIT_CONFIG_SYSTEM
//! ```
//!
//! The tree is removed exactly once, by [`SandboxContext::teardown`] or on drop.

use crate::error::SandboxError;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;
use tracing::{debug, warn};

/// Scripts wrapped by default.
pub const DEFAULT_SCRIPTS: [&str; 2] = ["git-alias.sh", "git-unalias.sh"];

/// Variable pointing git at the sandbox's global config file.
pub const GLOBAL_CONFIG_VAR: &str = "GIT_CONFIG_GLOBAL";

/// Variable pointing git at the sandbox's system config file.
pub const SYSTEM_CONFIG_VAR: &str = "GIT_CONFIG_SYSTEM";

/// How to build a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Directory holding the scripts under test.
    pub tool_dir: PathBuf,
    /// Script file names inside `tool_dir` that get wrappers.
    pub scripts: Vec<String>,
    /// Parent directory for sandbox roots; system temp when unset.
    pub sandbox_root: Option<PathBuf>,
    /// Whether commands see the host environment.
    pub inherit_env: bool,
    /// Extra variables for every command (overridden by the sandbox overlay).
    pub env: HashMap<String, String>,
}

impl SandboxSettings {
    pub fn new(tool_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_dir: tool_dir.into(),
            scripts: DEFAULT_SCRIPTS.iter().map(|s| s.to_string()).collect(),
            sandbox_root: None,
            inherit_env: false,
            env: HashMap::new(),
        }
    }
}

/// Whether stdout and stderr are captured separately or as one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Split,
    Combined,
}

/// Captured result of a command run in a sandbox.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code if the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal number if the process was terminated by a signal (Unix only).
    pub signal: Option<i32>,
    /// Standard output, or both streams interleaved in [`OutputMode::Combined`].
    pub stdout: String,
    /// Standard error; always empty in [`OutputMode::Combined`].
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One isolated, disposable execution environment.
#[derive(Debug)]
pub struct SandboxContext {
    root_path: PathBuf,
    bin_dir: PathBuf,
    repo_dir: PathBuf,
    env: BTreeMap<String, OsString>,
    inherit_env: bool,
    root: Option<tempfile::TempDir>,
}

impl SandboxContext {
    /// Build a fresh sandbox. Any failure leaves nothing behind.
    pub fn create(settings: &SandboxSettings) -> Result<Self, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("aliastest-");
        let temp = match &settings.sandbox_root {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                    action: "create sandbox parent",
                    path: parent.clone(),
                    source,
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|source| SandboxError::Io {
            action: "create sandbox in",
            path: settings
                .sandbox_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let root_path = canonicalize(temp.path(), "resolve sandbox root")?;
        let tool_dir = canonicalize(&settings.tool_dir, "resolve tool directory")?;
        let bin_dir = root_path.join("bin");
        let repo_dir = root_path.join("repo");

        std::fs::create_dir(&bin_dir).map_err(|source| SandboxError::Io {
            action: "create",
            path: bin_dir.clone(),
            source,
        })?;

        let tool_dir_rel = relative_path(&bin_dir, &tool_dir);
        for script in &settings.scripts {
            let stem = Path::new(script)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| script.clone());
            link(&tool_dir.join(script), &bin_dir.join(format!("{stem}-abs")))?;
            link(
                &tool_dir_rel.join(script),
                &bin_dir.join(format!("{stem}-rel")),
            )?;
        }

        let mut env: BTreeMap<String, OsString> = settings
            .env
            .iter()
            .map(|(k, v)| (k.clone(), OsString::from(v)))
            .collect();
        env.insert(
            GLOBAL_CONFIG_VAR.to_string(),
            root_path.join("gitconfig-global").into_os_string(),
        );
        env.insert(
            SYSTEM_CONFIG_VAR.to_string(),
            root_path.join("gitconfig-system").into_os_string(),
        );
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let path = std::env::join_paths(
            [bin_dir.clone(), tool_dir.clone()]
                .into_iter()
                .chain(std::env::split_paths(&inherited)),
        )
        .map_err(|e| SandboxError::Io {
            action: "build PATH with",
            path: bin_dir.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;
        env.insert("PATH".to_string(), path);

        let ctx = Self {
            root_path,
            bin_dir,
            repo_dir,
            env,
            inherit_env: settings.inherit_env,
            root: Some(temp),
        };

        let init = [
            "git".to_string(),
            "init".to_string(),
            "--quiet".to_string(),
            ctx.repo_dir.display().to_string(),
        ];
        ctx.run_checked_in(&ctx.root_path, &init)?;

        debug!(root = %ctx.root_path.display(), "created sandbox");
        Ok(ctx)
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Working directory for every command.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// The environment overlay applied to every command.
    pub fn env(&self) -> &BTreeMap<String, OsString> {
        &self.env
    }

    pub fn global_config(&self) -> PathBuf {
        PathBuf::from(&self.env[GLOBAL_CONFIG_VAR])
    }

    pub fn system_config(&self) -> PathBuf {
        PathBuf::from(&self.env[SYSTEM_CONFIG_VAR])
    }

    /// Resolve a path relative to the sandbox root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_path.join(path)
        }
    }

    /// Run a command in the repository directory with stdin closed.
    pub fn execute(
        &self,
        command: &[String],
        mode: OutputMode,
    ) -> Result<CommandOutput, SandboxError> {
        self.run_in(&self.repo_dir, command, mode)
    }

    /// Run a command that must exit 0.
    pub fn execute_checked(&self, command: &[String]) -> Result<CommandOutput, SandboxError> {
        self.run_checked_in(&self.repo_dir, command)
    }

    pub fn is_torn_down(&self) -> bool {
        self.root.is_none()
    }

    /// Remove the sandbox tree. Failures are logged, never returned, and
    /// calling this more than once does nothing.
    pub fn teardown(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        match root.close() {
            Ok(()) => debug!(root = %self.root_path.display(), "removed sandbox"),
            Err(e) => warn!(
                root = %self.root_path.display(),
                error = %e,
                "failed to fully clean up sandbox directory"
            ),
        }
    }

    fn run_checked_in(&self, cwd: &Path, command: &[String]) -> Result<CommandOutput, SandboxError> {
        let output = self.run_in(cwd, command, OutputMode::Split)?;
        if !output.success() {
            return Err(SandboxError::CommandFailed {
                command: command.to_vec(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn run_in(
        &self,
        cwd: &Path,
        command: &[String],
        mode: OutputMode,
    ) -> Result<CommandOutput, SandboxError> {
        let (program, args) = command.split_first().ok_or(SandboxError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(cwd).stdin(Stdio::null());
        if !self.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&self.env);

        let spawn_error = |source| SandboxError::Spawn {
            command: command.to_vec(),
            source,
        };

        debug!(?command, cwd = %cwd.display(), ?mode, "running command");

        let (status, stdout, stderr) = match mode {
            OutputMode::Split => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                let output = cmd.output().map_err(spawn_error)?;
                (
                    output.status,
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                )
            }
            OutputMode::Combined => {
                // Both streams share one file description, so writes interleave
                // in the order the child made them.
                let mut sink = tempfile::tempfile().map_err(spawn_error)?;
                cmd.stdout(Stdio::from(sink.try_clone().map_err(spawn_error)?));
                cmd.stderr(Stdio::from(sink.try_clone().map_err(spawn_error)?));
                let status = cmd.status().map_err(spawn_error)?;

                let mut bytes = Vec::new();
                sink.seek(SeekFrom::Start(0))
                    .and_then(|_| sink.read_to_end(&mut bytes))
                    .map_err(spawn_error)?;
                (
                    status,
                    String::from_utf8_lossy(&bytes).into_owned(),
                    String::new(),
                )
            }
        };

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Ok(CommandOutput {
            exit_code: status.code(),
            signal,
            stdout,
            stderr,
        })
    }
}

impl Drop for SandboxContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// A sandbox created on first use and reused by every test case that refers
/// to it, one at a time.
#[derive(Debug)]
pub struct SharedSandbox {
    settings: Rc<SandboxSettings>,
    slot: RefCell<Option<SandboxContext>>,
}

impl SharedSandbox {
    pub fn new(settings: Rc<SandboxSettings>) -> Self {
        Self {
            settings,
            slot: RefCell::new(None),
        }
    }

    /// Run `f` against the sandbox, creating it if needed.
    pub fn with_context<T>(
        &self,
        f: impl FnOnce(&SandboxContext) -> T,
    ) -> Result<T, SandboxError> {
        let mut slot = self.slot.borrow_mut();
        let ctx = match slot.take() {
            Some(ctx) => ctx,
            None => SandboxContext::create(&self.settings)?,
        };
        let ctx = slot.insert(ctx);
        Ok(f(ctx))
    }

    pub fn is_active(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Tear down the sandbox if it was created. A later use creates a new one.
    pub fn teardown(&self) {
        if let Some(mut ctx) = self.slot.borrow_mut().take() {
            ctx.teardown();
        }
    }
}

/// The execution context a test case runs in.
#[derive(Debug, Clone)]
pub enum ContextRef {
    /// A new sandbox just for this run, removed as soon as it finishes.
    Fresh(Rc<SandboxSettings>),
    /// A sandbox shared sequentially with other test cases.
    Shared(Rc<SharedSandbox>),
}

impl ContextRef {
    pub fn with_context<T>(
        &self,
        f: impl FnOnce(&SandboxContext) -> T,
    ) -> Result<T, SandboxError> {
        match self {
            ContextRef::Fresh(settings) => {
                let mut ctx = SandboxContext::create(settings)?;
                let out = f(&ctx);
                ctx.teardown();
                Ok(out)
            }
            ContextRef::Shared(shared) => shared.with_context(f),
        }
    }
}

fn canonicalize(path: &Path, action: &'static str) -> Result<PathBuf, SandboxError> {
    std::fs::canonicalize(path).map_err(|source| SandboxError::Io {
        action,
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn link(target: &Path, link: &Path) -> Result<(), SandboxError> {
    std::os::unix::fs::symlink(target, link).map_err(|source| SandboxError::Io {
        action: "create symlink",
        path: link.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn link(_target: &Path, _link: &Path) -> Result<(), SandboxError> {
    Err(SandboxError::Unsupported)
}

/// Path from `from_dir` to `to`; both must be absolute and canonical.
fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    rel
}
