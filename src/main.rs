use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flatdex::error::BuildError;
use flatdex::request::{BuildContext, BuildMode, BuildRequest, IndexFormat, execute};
use flatdex::spec::{
    Action, AimOptions, BuildSpec, IndexOptions, ModeOptions, ParsedCommand, Verbosity,
    parse_command,
};
use flatdex::utils::AppConfig;
use flatdex::{index, output};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flatdex")]
#[command(about = "Batch index builder for flat record files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, reindex or rename a prefix-compressed B-tree index (ISI)
    Index {
        /// input [output] key fields and options, e.g. `data.txt 1-8 -B=512 -D`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Build, reindex or rename an n-gram signature index (AIM)
    Aimdex {
        /// input [output] key fields and options, e.g. `data.txt 1-20 21-40X -Z=199`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Show statistics for an ISI or AIM file
    Stats {
        /// Index file
        path: PathBuf,

        /// Configuration file to use instead of the default
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let color = !cli.no_color && std::io::stderr().is_terminal();

    if let Err(err) = run(cli) {
        let detail = match err.downcast_ref::<BuildError>() {
            Some(build) => build.detail(),
            None => format!("{err:#}"),
        };
        output::print_error(&detail, color);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let color = !cli.no_color;
    match cli.command {
        Commands::Index { args } => {
            let parsed = parse_command::<IndexOptions>(&args)?;
            run_build(parsed, IndexFormat::Isi, BuildMode::BuildIndex, color)
        }
        Commands::Aimdex { args } => {
            let parsed = parse_command::<AimOptions>(&args)?;
            run_build(parsed, IndexFormat::Aim, BuildMode::BuildSignature, color)
        }
        Commands::Stats { path, config } => {
            init_tracing(Verbosity::Quiet);
            let ctx = BuildContext::from_config(&load_config(config.as_deref())?, Verbosity::Quiet);
            index::stats::show_stats(&path, &ctx)?;
            Ok(())
        }
    }
}

fn run_build<O: ModeOptions>(
    parsed: ParsedCommand<O>,
    format: IndexFormat,
    build: fn(BuildSpec<O>) -> BuildMode,
    color: bool,
) -> Result<()> {
    init_tracing(parsed.verbosity);
    let config = load_config(parsed.config_path.as_deref())?;
    let ctx = BuildContext::from_config(&config, parsed.verbosity);

    let text_marker = parsed.spec.options.text_marker();
    let mode = match parsed.action {
        Action::Build => build(parsed.spec),
        Action::Reindex => BuildMode::Reindex(format),
        Action::Rename => BuildMode::RenameSourceReference { format, text_marker },
    };
    let request = BuildRequest {
        mode,
        source: Some(parsed.input),
        output: parsed.output,
    };

    let summary = execute(&request, &ctx)
        .with_context(|| format!("building {}", request.output.display()))?;
    output::print_summary(
        &summary,
        &request.output,
        parsed.verbosity >= Verbosity::Verbose,
        color,
    )?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// `RUST_LOG` wins; otherwise the verbosity flags pick the level
fn init_tracing(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Verbose => "info",
        Verbosity::Extra => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
