//! cload CLI: inspection and operator commands for the extension loader.
//!
//! Provides `cload probe` to show the detected toolchain, `cload log` to
//! read the build transcript of a module, `cload build` to build modules
//! ahead of import, `cload call` to import a module and call one of its
//! functions, and `cload clear` to remove cache directories.

#![warn(missing_docs)]

mod build;
mod call;
mod clear;
mod probe;
mod project;
mod transcript;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::LevelFilter;

/// cload: import-time compilation of C, Objective-C and C++ extensions.
#[derive(Parser, Debug)]
#[command(name = "cload", version, about = "Compiled-extension loader")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `cload.toml` configuration file or its directory.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Compilation role; overrides `CLOAD_ROLE` and `loader.role`.
    #[arg(long, global = true)]
    pub role: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the toolchain environment extensions are built with.
    Probe(ProbeArgs),
    /// Print the build transcript of a module.
    Log(LogArgs),
    /// Build modules without importing them into a program.
    Build(BuildArgs),
    /// Import a module and call a zero-argument function.
    Call(CallArgs),
    /// Remove cache directories.
    Clear(ClearArgs),
}

/// Arguments for the `cload probe` subcommand.
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

/// Arguments for the `cload log` subcommand.
#[derive(Parser, Debug)]
pub struct LogArgs {
    /// Dotted module path (e.g. `pkg.fixture`).
    pub module: String,

    /// Print every retained attempt, oldest first.
    #[arg(short, long)]
    pub all: bool,
}

/// Arguments for the `cload build` subcommand.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Dotted module paths to build.
    #[arg(required = true, num_args = 1..)]
    pub modules: Vec<String>,
}

/// Arguments for the `cload call` subcommand.
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Dotted module path.
    pub module: String,

    /// Name of the exported function.
    pub function: String,
}

/// Arguments for the `cload clear` subcommand.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Trees to clear (default: the project root).
    pub dirs: Vec<PathBuf>,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable terminal output.
    Text,
    /// Machine-readable JSON output.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
    /// Optional role override.
    pub role: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
        role: cli.role,
    };

    let result = match cli.command {
        Command::Probe(ref args) => probe::run(args, &global),
        Command::Log(ref args) => transcript::run(args, &global),
        Command::Build(ref args) => build::run(args, &global),
        Command::Call(ref args) => call::run(args, &global),
        Command::Clear(ref args) => clear::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", project::render_error(e.as_ref()));
            process::exit(1);
        }
    }
}

/// Installs `env_logger`; `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}
