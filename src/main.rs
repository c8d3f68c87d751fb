mod bytecode;
mod descriptor;
mod error;
mod ir;
mod jar;
mod nest;
mod neutralize;
mod opcodes;
mod parse;
mod pass;
mod relocate;
mod report;
mod skip;
#[cfg(test)]
mod testutil;
mod write;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use crate::jar::{read_entries, write_entries};
use crate::pass::{ClassOutcome, desugar_class, desugar_entries};
use crate::report::{build_report, write_report};
use crate::skip::SkipList;

/// CLI arguments for jdesugar execution.
#[derive(Parser, Debug)]
#[command(
    name = "jdesugar",
    about = "Neutralize MethodHandle call sites and nest attributes in JVM class files and JARs.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: PathBuf,
    /// File with one class name prefix per line whose method bodies are removed.
    #[arg(long, value_name = "PATH")]
    skip_list: Option<PathBuf>,
    /// Write a JSON summary to PATH (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(Debug)]
struct RunSummary {
    entries: usize,
    classes: Vec<ClassOutcome>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    run(cli)
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    let skip_list = match &cli.skip_list {
        Some(path) => SkipList::from_file(path)?,
        None => SkipList::default(),
    };
    if !skip_list.prefixes().is_empty() {
        info!("skipping {} class prefix(es)", skip_list.prefixes().len());
    }

    let started_at = Instant::now();
    let summary = match cli.jobs {
        Some(jobs) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context("failed to build worker pool")?;
            pool.install(|| desugar_input(&cli.input, &cli.output, &skip_list))?
        }
        None => desugar_input(&cli.input, &cli.output, &skip_list)?,
    };

    let rewritten: usize = summary.classes.iter().map(|c| c.rewritten_call_sites).sum();
    info!(
        "desugared {} classes, rewrote {} call site(s)",
        summary.classes.len(),
        rewritten
    );

    if let Some(path) = &cli.report {
        let report = build_report(&cli.input, &cli.output, summary.entries, &summary.classes);
        write_report(path, &report)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} entries={} classes={}",
            started_at.elapsed().as_millis(),
            summary.entries,
            summary.classes.len()
        );
    }

    Ok(())
}

fn desugar_input(input: &Path, output: &Path, skip_list: &SkipList) -> Result<RunSummary> {
    match input.extension().and_then(|ext| ext.to_str()) {
        Some("class") => desugar_class_file(input, output, skip_list),
        Some("jar") | Some("zip") => desugar_jar(input, output, skip_list),
        _ => anyhow::bail!("unsupported input type: {}", input.display()),
    }
}

fn desugar_class_file(input: &Path, output: &Path, skip_list: &SkipList) -> Result<RunSummary> {
    let data = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let (bytes, mut outcome) = desugar_class(&data, skip_list)
        .with_context(|| format!("failed to desugar {}", input.display()))?;
    outcome.path = input.display().to_string();
    fs::write(output, bytes).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(RunSummary {
        entries: 1,
        classes: vec![outcome],
    })
}

fn desugar_jar(input: &Path, output: &Path, skip_list: &SkipList) -> Result<RunSummary> {
    let entries = read_entries(input)?;
    let entry_count = entries.len();
    let pass = desugar_entries(entries, skip_list)?;
    if pass.classes.is_empty() {
        warn!("no class entries in {}", input.display());
    }
    write_entries(output, &pass.entries)?;
    Ok(RunSummary {
        entries: entry_count,
        classes: pass.classes,
    })
}
