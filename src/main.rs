use aliastest::expand::Expander;
use aliastest::loader::{self, LoadedSuites};
use aliastest::report::{self, Counts, Printer, Report};
use aliastest::runner;
use aliastest::schema::{self, SandboxDir};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable report tree
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "aliastest")]
#[command(about = "A conformance test harness for git alias management tools")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute test specs
    Run {
        /// Spec files or directories; suite config is read from the first one
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Only run tests whose path contains this substring
        #[arg(short, long)]
        filter: Option<String>,
        /// Print successful tests as well as failing ones
        #[arg(short, long)]
        show_successful: bool,
        /// Directory containing the scripts under test (overrides suite config)
        #[arg(long)]
        tool_dir: Option<PathBuf>,
        /// Directory for test sandboxes (overrides suite config).
        /// Use "local" for .aliastest/<timestamp>/, or specify a path.
        #[arg(long)]
        sandbox_dir: Option<String>,
    },
    /// Load and expand test specs without running them
    Validate {
        /// Spec files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Scaffold a new spec file
    Init {
        /// Output path for the new spec file
        #[arg(default_value = "suites/example.yaml")]
        path: PathBuf,
    },
    /// Output the spec schema
    Schema {
        /// Print the schema of the suite config file instead
        #[arg(long)]
        config: bool,
    },
}

const TEMPLATE: &str = r#"version: 1
name: add

# Share one sandbox between the tests of each suite instance.
# sandbox: shared

# Expand the suite once per value of parameters from aliastest.yaml.
# matrix: [location-flags]

tests:
  - name: supports a single argument as the body of an alias
    cmd: [git-alias.sh, --global, add, foo, diff a b]
    expect:
      exit: 0
      output: ""
      entries:
        - location: [--global]
          entries:
            foo: diff a b

  - name: fails without a body
    cmd: [git-alias.sh, --global, add, foo]
    expect:
      exit: 1
      stdout: ""
      stderr:
        regex: '\bbody\b'
"#;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let code = match cli.command {
        Command::Run {
            paths,
            output,
            filter,
            show_successful,
            tool_dir,
            sandbox_dir,
        } => run(
            &paths,
            output,
            filter.as_deref(),
            show_successful,
            tool_dir,
            sandbox_dir,
        ),
        Command::Validate { paths } => validate(&paths),
        Command::Init { path } => init(&path),
        Command::Schema { config } => {
            let schema = if config {
                schema::generate_config_schema()
            } else {
                schema::generate_schema()
            };
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => {
                    println!("{json}");
                    0
                }
                Err(e) => {
                    eprintln!("Error serializing schema: {e}");
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

/// Options that shape loading, shared by `run` and `validate`.
struct LoadOptions {
    tool_dir: Option<PathBuf>,
    sandbox_dir: Option<String>,
}

/// Load the suite config next to the first path, then every spec.
fn load(paths: &[PathBuf], options: LoadOptions) -> Result<(LoadedSuites, bool), String> {
    let first = &paths[0];
    let test_root = if first.is_file() {
        first.parent().unwrap_or(Path::new("."))
    } else {
        first.as_path()
    };

    let mut config = loader::load_suite_config(test_root)
        .map_err(|e| format!("Error loading suite config: {e}"))?
        .unwrap_or_default();

    // CLI sandbox_dir overrides suite config
    if let Some(dir) = options.sandbox_dir {
        config.sandbox_dir = Some(SandboxDir::from(dir));
    }

    let mut settings = loader::sandbox_settings(&config, test_root);
    if let Some(dir) = options.tool_dir {
        settings.tool_dir = dir;
    }
    let expander = Expander::new(Rc::new(settings), config.parameters.clone());

    let mut spec_paths = Vec::new();
    for path in paths {
        let found = loader::find_specs(path)
            .map_err(|e| format!("Error finding specs in {}: {e}", path.display()))?;
        spec_paths.extend(found);
    }
    if spec_paths.is_empty() {
        let shown: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
        return Err(format!("No spec files found at: {}", shown.join(", ")));
    }

    Ok((loader::load_suites(&spec_paths, &expander), config.show_successful))
}

fn report_load_errors(loaded: &LoadedSuites) {
    for (path, e) in &loaded.errors {
        eprintln!("✗ Failed to load {}: {e}", path.display());
    }
}

fn run(
    paths: &[PathBuf],
    output: OutputFormat,
    filter: Option<&str>,
    show_successful: bool,
    tool_dir: Option<PathBuf>,
    sandbox_dir: Option<String>,
) -> i32 {
    let options = LoadOptions {
        tool_dir,
        sandbox_dir,
    };
    let (loaded, config_show_successful) = match load(paths, options) {
        Ok(loaded) => loaded,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };
    report_load_errors(&loaded);

    let LoadedSuites {
        nodes,
        files,
        errors,
    } = loaded;
    let nodes: Vec<_> = match filter {
        Some(f) => nodes.into_iter().filter_map(|n| n.filter(f)).collect(),
        None => nodes,
    };

    let run_start = Instant::now();
    let reports = runner::run_all(&nodes);
    let total_time = run_start.elapsed();
    // Tears down any shared sandbox an interrupted after_all left behind.
    drop(nodes);

    let counts: Counts = reports.iter().map(Report::counts).sum();
    let printed = match output {
        OutputFormat::Human => print_human(
            &reports,
            &counts,
            files,
            show_successful || config_show_successful,
        ),
        OutputFormat::Json => {
            let load_errors: Vec<_> = errors
                .iter()
                .map(|(path, e)| {
                    serde_json::json!({
                        "file": path.display().to_string(),
                        "error": e.to_string(),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "status": report::overall_status(&reports),
                "files": files,
                "counts": counts,
                "load_errors": load_errors,
                "reports": reports,
            });
            serde_json::to_string_pretty(&output)
                .map_err(io::Error::other)
                .and_then(|json| writeln!(io::stdout(), "{json}"))
        }
        OutputFormat::Junit => write!(
            io::stdout(),
            "{}",
            report::format_junit_xml(&reports, total_time)
        ),
    };
    if let Err(e) = printed {
        eprintln!("Error writing report: {e}");
        return 1;
    }

    if !errors.is_empty() {
        return 1;
    }
    report::exit_code(&reports)
}

fn print_human(
    reports: &[Report],
    counts: &Counts,
    files: usize,
    show_successful: bool,
) -> io::Result<()> {
    let printer = Printer::new(show_successful);
    let mut out = io::stdout().lock();
    for report in reports {
        printer.print(report, &mut out)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", report::summary_line(counts, files))
}

fn validate(paths: &[PathBuf]) -> i32 {
    let options = LoadOptions {
        tool_dir: None,
        sandbox_dir: None,
    };
    let (loaded, _) = match load(paths, options) {
        Ok(loaded) => loaded,
        Err(message) => {
            eprintln!("{message}");
            return 1;
        }
    };
    report_load_errors(&loaded);

    for node in &loaded.nodes {
        println!("✓ {} ({} tests)", node.name(), node.leaf_count());
    }

    if !loaded.errors.is_empty() {
        eprintln!("\n{} spec(s) failed validation", loaded.errors.len());
        return 1;
    }
    println!("\nAll {} spec(s) valid", loaded.files);
    0
}

fn init(path: &Path) -> i32 {
    if path.exists() {
        eprintln!("Error: file already exists: {}", path.display());
        return 1;
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
        && let Err(e) = fs::create_dir_all(parent)
    {
        eprintln!("Error creating directory: {e}");
        return 1;
    }
    if let Err(e) = fs::write(path, TEMPLATE) {
        eprintln!("Error writing file: {e}");
        return 1;
    }
    println!("Created: {}", path.display());
    0
}
