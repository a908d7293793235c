//! Assayer CLI - data-quality runs from project files

mod config;
mod logging;

use anyhow::{Context, Result, bail};
use assayer::{
    Isolation, Operation, PluginOutput, PluginRegistry, ProjectConfig, Resource, Run, RunBuilder,
    StoreKind, StoreParameters,
};
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the local store that serves `--data` files.
const DATA_STORE: &str = "cli-data";

/// Output root used when neither the project nor the defaults name one.
const DEFAULT_OUTPUT_ROOT: &str = "assayer-runs";

#[derive(Parser)]
#[command(name = "assayer")]
#[command(
    about = "Data-quality runs: inference, validation, profiling, metrics",
    long_about = None
)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Path to config file (default: ~/.config/assayer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every operation a project configures
    Run {
        /// Project file (YAML, TOML, or JSON)
        project: PathBuf,
        /// Fail when any plugin reports an error
        #[arg(long)]
        strict: bool,
        /// How process-lane plugins are isolated [default: subprocess, unless
        /// the project names its own worker program]
        #[arg(long, value_enum)]
        isolation: Option<IsolationArg>,
        /// Add local files matching a glob as resources
        #[arg(long = "data", value_name = "GLOB")]
        data: Vec<String>,
        /// Override the run id
        #[arg(long)]
        run_id: Option<String>,
        /// Replace an existing run with the same id
        #[arg(long)]
        overwrite: bool,
        /// Run every plugin on the driver thread
        #[arg(long)]
        sequential: bool,
        /// Width of the thread and process lanes
        #[arg(long)]
        num_worker: Option<usize>,
    },

    /// List registered libraries
    Libraries,

    /// Parse and validate a project without running it
    Check {
        /// Project file (YAML, TOML, or JSON)
        project: PathBuf,
    },

    /// Process-lane worker: one plugin request on stdin, its output on stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum IsolationArg {
    /// JSON round trip inside this process
    Isolated,
    /// One `assayer worker` child process per plugin
    Subprocess,
}

/// Output verbosity level.
#[derive(Clone, Copy)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn info(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }

    fn log_level(self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("error"),
            Verbosity::Normal => None,
            Verbosity::Verbose => Some("debug"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        Config::load_from_path(Some(path.clone()))
    } else {
        Config::load()
    };
    let verbosity = Verbosity::from_flags(cli.verbose, cli.quiet);

    // Flags override the defaults file
    let log_level = cli
        .log_level
        .as_deref()
        .or(verbosity.log_level())
        .unwrap_or(config.defaults.log_level.as_str());
    logging::init(log_level);

    let registry = Arc::new(registry());

    match cli.command {
        Commands::Run {
            project,
            strict,
            isolation,
            data,
            run_id,
            overwrite,
            sequential,
            num_worker,
        } => {
            let opts = RunOptions {
                strict,
                isolation,
                data,
                run_id,
                overwrite,
                sequential,
                num_worker,
            };
            cmd_run(registry, &config, &project, opts, verbosity)
        }
        Commands::Libraries => cmd_libraries(&registry),
        Commands::Check { project } => cmd_check(&registry, &project, verbosity),
        Commands::Worker => cmd_worker(&registry),
    }
}

fn registry() -> PluginRegistry {
    #[allow(unused_mut)]
    let mut registry = PluginRegistry::new();

    #[cfg(feature = "builtin")]
    assayer_builtin::register_all(&mut registry);

    registry
}

struct RunOptions {
    strict: bool,
    isolation: Option<IsolationArg>,
    data: Vec<String>,
    run_id: Option<String>,
    overwrite: bool,
    sequential: bool,
    num_worker: Option<usize>,
}

fn load_project(path: &Path) -> Result<ProjectConfig> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read project file {}", path.display()))?;
    let project = ProjectConfig::from_bytes(&data, path.to_str())
        .with_context(|| format!("Failed to parse project file {}", path.display()))?;
    project.validate().context("Invalid project")?;
    project.error_report_mode().context("Invalid project")?;
    Ok(project)
}

/// Configured operations in run order, with the work each one does.
fn planned_operations(project: &ProjectConfig) -> Vec<Operation> {
    Operation::ALL
        .into_iter()
        .filter(|op| !project.run.exec_configs(*op).is_empty())
        .filter(|op| match op {
            Operation::Validation => !project.constraints.is_empty(),
            Operation::Metric => !project.metrics.is_empty(),
            _ => true,
        })
        .collect()
}

fn cmd_run(
    registry: Arc<PluginRegistry>,
    config: &Config,
    path: &Path,
    opts: RunOptions,
    v: Verbosity,
) -> Result<()> {
    let mut project = load_project(path)?;
    apply_options(&mut project, config, &opts)?;

    let operations = planned_operations(&project);
    let error_report = project.error_report_mode()?;
    let mut run = RunBuilder::from_project(&project, registry)
        .build()
        .context("Failed to create run")?;

    v.info(&format!(
        "Run {}/{} ({} resources)",
        run.info().experiment,
        run.info().run_id,
        run.info().resources.len()
    ));

    let steps = operations.len() + usize::from(project.persist_data);
    let pb = if !matches!(v, Verbosity::Quiet) {
        let pb = ProgressBar::new(steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Some(pb)
    } else {
        None
    };

    let result = run.scope(|run| {
        for &operation in &operations {
            if let Some(ref pb) = pb {
                pb.set_message(operation.to_string());
            }
            match operation {
                Operation::Inference => {
                    run.log_schema()?;
                    run.persist_schema()?;
                }
                Operation::Validation => {
                    run.log_report(&project.constraints, error_report)?;
                    run.persist_report(&project.constraints, error_report)?;
                }
                Operation::Profiling => {
                    run.log_profile()?;
                    run.persist_profile()?;
                }
                Operation::Metric => {
                    run.log_metric(&project.metrics)?;
                    run.persist_metric(&project.metrics)?;
                }
            }
            if let Some(ref pb) = pb {
                pb.inc(1);
            }
        }
        if project.persist_data {
            if let Some(ref pb) = pb {
                pb.set_message("data");
            }
            run.persist_data()?;
            if let Some(ref pb) = pb {
                pb.inc(1);
            }
        }
        Ok(())
    });

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    result.context("Run failed")?;

    let failures = print_summary(&run, v);
    if let Some(run_path) = output_location(&project) {
        v.info(&format!("Outputs: {}", run_path.display()));
    }
    if opts.strict && failures > 0 {
        bail!("{failures} plugin(s) reported errors");
    }
    Ok(())
}

/// Fold CLI flags and user defaults into the project.
fn apply_options(project: &mut ProjectConfig, config: &Config, opts: &RunOptions) -> Result<()> {
    let defaults = &config.defaults;

    if let Some(run_id) = &opts.run_id {
        project.run_id = Some(run_id.clone());
    }
    project.overwrite |= opts.overwrite;

    if let Some(parallel) = defaults.parallel {
        project.run.parallel = parallel;
    }
    if opts.sequential {
        project.run.parallel = false;
    }
    if let Some(n) = opts.num_worker.or(defaults.num_worker) {
        if n == 0 {
            bail!("--num-worker must be at least 1");
        }
        project.run.num_worker = n;
    }
    // Process-lane plugins run in `assayer worker` children unless
    // `--isolation isolated` is given or the project names its own worker.
    let subprocess = match opts.isolation {
        Some(IsolationArg::Subprocess) => true,
        Some(IsolationArg::Isolated) => false,
        None => project.run.isolation == Isolation::Isolated,
    };
    if subprocess {
        let program = std::env::current_exe().context("Failed to locate the assayer executable")?;
        project.run.isolation = Isolation::Subprocess {
            program,
            args: vec!["worker".to_string()],
        };
    } else if opts.isolation == Some(IsolationArg::Isolated) {
        project.run.isolation = Isolation::Isolated;
    }

    if project.metadata_store.is_none() {
        let root = defaults
            .output_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT));
        project.metadata_store = Some(
            StoreParameters::new("output", StoreKind::Local).uri(root.to_string_lossy()),
        );
    }

    let files = expand_data_globs(&opts.data)?;
    if !files.is_empty() {
        if project.stores.iter().any(|s| s.name == DATA_STORE) {
            bail!("project already defines a store named '{DATA_STORE}'");
        }
        project.stores.push(StoreParameters::new(DATA_STORE, StoreKind::Local));
        for file in files {
            let name = resource_name(&file, &project.resources);
            project
                .resources
                .push(Resource::new(name, file.to_string_lossy().into_owned(), DATA_STORE));
        }
    }
    Ok(())
}

/// Files matched by the `--data` patterns, sorted.
fn expand_data_globs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let paths =
            glob::glob(pattern).with_context(|| format!("Invalid glob pattern '{pattern}'"))?;
        let before = files.len();
        files.extend(paths.flatten().filter(|p| p.is_file()));
        if files.len() == before {
            tracing::warn!(pattern = %pattern, "pattern matched no files");
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// File stem, suffixed until it is unique among `existing`.
fn resource_name(path: &Path, existing: &[Resource]) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    let taken = |name: &str| existing.iter().any(|r| r.name == name);
    if !taken(stem.as_str()) {
        return stem;
    }
    (1..)
        .map(|n| format!("{stem}_{n}"))
        .find(|name| !taken(name.as_str()))
        .unwrap_or(stem)
}

fn output_location(project: &ProjectConfig) -> Option<PathBuf> {
    let store = project.metadata_store.as_ref()?;
    if store.kind != StoreKind::Local {
        return None;
    }
    let root = store.uri.as_deref().or_else(|| store.config_str("path"))?;
    Some(Path::new(root).join(&project.experiment))
}

/// Print one line per plugin. Returns the number of failed plugins.
fn print_summary(run: &Run, v: Verbosity) -> usize {
    let mut failures = 0;
    for operation in run.results().operations() {
        let outputs = run.results().get(operation);
        v.info(&format!("\n{operation} ({} plugins)", outputs.len()));
        for output in outputs {
            if !output.is_success() {
                failures += 1;
            }
            v.info(&format!("  {}", summary_line(output)));
            for error in output.errors() {
                v.info(&format!("      {error}"));
            }
        }
    }
    v.info(&format!("\nStatus: {} ({} plugin errors)", run.status(), failures));
    failures
}

fn summary_line(output: &PluginOutput) -> String {
    let status = if output.is_success() { "ok " } else { "ERR" };
    let subject = match output.plugin.payload.name() {
        Some(name) => format!("{}[{}]", output.plugin.resource.name, name),
        None => output.plugin.resource.name.clone(),
    };
    let verdict = match &output.report.artifact {
        Some(assayer::NormalizedReport::Validation(report)) if !report.valid => {
            format!(" invalid ({} errors)", report.errors.count)
        }
        Some(assayer::NormalizedReport::Metric(report)) => format!(" = {}", report.value),
        _ => String::new(),
    };
    format!(
        "{status} {:<10} {subject}{verdict} ({:.3}s)",
        output.plugin.library, output.operation.duration
    )
}

fn cmd_libraries(registry: &PluginRegistry) -> Result<()> {
    println!("Available libraries:\n");

    for decl in registry.declarations() {
        println!("  {} {}", decl.name, decl.version);
        if !decl.description.is_empty() {
            println!("    {}", decl.description);
        }
        for (operation, affinity) in &decl.operations {
            println!("    {operation}: {affinity:?}");
        }
        println!();
    }

    println!("Total: {} libraries", registry.len());
    Ok(())
}

fn cmd_check(registry: &PluginRegistry, path: &Path, v: Verbosity) -> Result<()> {
    let project = load_project(path)?;

    let mut missing = Vec::new();
    for operation in Operation::ALL {
        for exec in project.run.exec_configs(operation) {
            if let Err(e) = registry.resolve(operation, &exec.library) {
                missing.push(e.to_string());
            }
        }
    }
    let names: Vec<&str> = project.resources.iter().map(|r| r.name.as_str()).collect();
    for (owner, resources) in project
        .constraints
        .iter()
        .map(|c| (&c.name, &c.resources))
        .chain(project.metrics.iter().map(|m| (&m.name, &m.resources)))
    {
        for resource in resources {
            if !names.contains(&resource.as_str()) {
                missing.push(format!("'{owner}' references unknown resource '{resource}'"));
            }
        }
    }
    if !missing.is_empty() {
        bail!("Invalid project {}:\n  {}", path.display(), missing.join("\n  "));
    }

    v.info(&format!(
        "{}: ok ({} stores, {} resources, {} constraints, {} metrics)",
        path.display(),
        project.stores.len(),
        project.resources.len(),
        project.constraints.len(),
        project.metrics.len()
    ));
    Ok(())
}

fn cmd_worker(registry: &PluginRegistry) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    assayer::worker::serve(registry, stdin.lock(), stdout.lock()).context("Worker failed")?;
    Ok(())
}
