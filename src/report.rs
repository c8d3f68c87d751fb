use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::pass::ClassOutcome;

/// Machine-readable summary of one desugaring run.
#[derive(Debug, Serialize)]
pub(crate) struct Report {
    tool: &'static str,
    version: &'static str,
    arguments: Vec<String>,
    input: String,
    output: String,
    entries: usize,
    classes: usize,
    rewritten_call_sites: usize,
    stripped_nest_attributes: usize,
    removed_method_bodies: usize,
    skipped_classes: Vec<String>,
    rewritten_classes: Vec<RewrittenClass>,
}

#[derive(Debug, Serialize)]
struct RewrittenClass {
    name: String,
    path: String,
    call_sites: usize,
}

pub(crate) fn build_report(
    input: &Path,
    output: &Path,
    entries: usize,
    classes: &[ClassOutcome],
) -> Report {
    let skipped_classes = classes
        .iter()
        .filter(|class| class.skipped)
        .map(|class| class.class_name.clone())
        .collect();
    let rewritten_classes = classes
        .iter()
        .filter(|class| class.rewritten_call_sites > 0)
        .map(|class| RewrittenClass {
            name: class.class_name.clone(),
            path: class.path.clone(),
            call_sites: class.rewritten_call_sites,
        })
        .collect();

    Report {
        tool: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        arguments: std::env::args().collect(),
        input: input.display().to_string(),
        output: output.display().to_string(),
        entries,
        classes: classes.len(),
        rewritten_call_sites: classes.iter().map(|c| c.rewritten_call_sites).sum(),
        stripped_nest_attributes: classes.iter().map(|c| c.stripped_attributes).sum(),
        removed_method_bodies: classes.iter().map(|c| c.removed_bodies).sum(),
        skipped_classes,
        rewritten_classes,
    }
}

/// Write the report as pretty JSON; `-` means stdout.
pub(crate) fn write_report(path: &Path, report: &Report) -> Result<()> {
    let mut writer = report_writer(path)?;
    serde_json::to_writer_pretty(&mut writer, report).context("failed to serialize report")?;
    writer.write_all(b"\n").context("failed to write report")?;
    Ok(())
}

fn report_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(
        File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
    ))
}
