use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use strata_artifacts::{assemble_pieces, AssembleOptions};
use strata_config::{init_tracing, StrataConfig};
use strata_validate::{validate_mode, Report, ValidateError, ValidateOptions};

#[derive(Parser)]
#[command(name = "strata", version, about = "Strata CLI (index artifact validation and assembly)")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the persisted index of one or more modes
    Validate(ValidateArgs),
    /// Merge partial indexes into one mode index
    Assemble(AssembleArgs),
}

#[derive(Args)]
struct ValidateArgs {
    /// Repository root (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Mode to validate; repeat for several. Defaults to the configured modes
    #[arg(long = "mode", value_name = "MODE")]
    modes: Vec<String>,
    /// Demote manifest and schema gaps to warnings
    #[arg(long)]
    non_strict: bool,
    /// Skip the sqlite parity sample
    #[arg(long)]
    no_sqlite: bool,
    /// Emit the full report as JSON
    #[arg(long)]
    json: bool,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct AssembleArgs {
    /// Output index directory
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "code")]
    mode: String,
    #[arg(long)]
    stage: Option<String>,
    /// Accept inputs without a pieces manifest
    #[arg(long)]
    non_strict: bool,
    /// Emit a JSON summary
    #[arg(long)]
    json: bool,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Partial index directories, in merge order
    #[arg(required = true, value_name = "INPUT")]
    inputs: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Assemble(args) => run_assemble(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    let config = match path {
        Some(path) => StrataConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StrataConfig::default(),
    };
    init_tracing(&config.logging);
    Ok(config)
}

fn run_validate(args: ValidateArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let mut opts = ValidateOptions::from_config(&args.root, &config);
    if !args.modes.is_empty() {
        opts.modes = args.modes;
    }
    if args.non_strict {
        opts.strict = false;
    }
    if args.no_sqlite {
        opts.sqlite.enabled = false;
    }

    let report = validate_concurrently(opts)?;
    print_report(&report, args.json)?;
    Ok(if report.ok { 0 } else { 1 })
}

/// One blocking task per mode; results are merged in mode order.
fn validate_concurrently(opts: ValidateOptions) -> Result<Report> {
    if !opts.root.is_dir() {
        return Err(ValidateError::RootMissing(opts.root).into());
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;
    let opts = Arc::new(opts);
    tracing::debug!(target: "strata.cli", modes = ?opts.modes, strict = opts.strict, "validating");

    runtime.block_on(async {
        let tasks: Vec<_> = opts
            .modes
            .iter()
            .cloned()
            .map(|mode| {
                let opts = Arc::clone(&opts);
                tokio::task::spawn_blocking(move || validate_mode(&opts, &mode))
            })
            .collect();

        let mut report = Report::new(opts.root.clone(), opts.index_root.clone(), opts.strict);
        for task in tasks {
            report.merge(task.await.context("validation task failed")?);
        }
        report.finalize();
        Ok::<_, anyhow::Error>(report)
    })
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        print_json(report)?;
        return Ok(());
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for hint in &report.hints {
        println!("hint: {hint}");
    }
    println!(
        "summary: {} ({} issues, {} warnings)",
        if report.ok { "ok" } else { "failed" },
        report.issues.len(),
        report.warnings.len()
    );
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssembleOutput<'a> {
    out: &'a Path,
    inputs: usize,
    chunk_count: usize,
    manifest: &'a Path,
}

fn run_assemble(args: AssembleArgs) -> Result<i32> {
    let config = load_config(args.config.as_deref())?;
    let opts = AssembleOptions {
        mode: args.mode,
        stage: args.stage,
        strict: !args.non_strict,
        max_bytes: config.validate.max_json_bytes,
        ..AssembleOptions::default()
    };
    let summary = assemble_pieces(&args.inputs, &args.out, &opts)
        .with_context(|| format!("failed to assemble {}", args.out.display()))?;

    if args.json {
        print_json(&AssembleOutput {
            out: &args.out,
            inputs: summary.inputs,
            chunk_count: summary.chunk_count,
            manifest: &summary.manifest_path,
        })?;
    } else {
        println!("assembled: {}", args.out.display());
        println!("  inputs: {}", summary.inputs);
        println!("  chunks: {}", summary.chunk_count);
        println!("  manifest: {}", summary.manifest_path.display());
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
