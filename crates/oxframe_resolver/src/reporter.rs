use std::{
    env,
    io::{self, Write},
    path::{Component, Path, PathBuf},
};

use colored::Colorize;
use log::{debug, trace};
use serde::Serialize;

use crate::{
    batch::{BatchReport, FileOutcome},
    types::{FieldSource, Resolution},
};

/// Relativize a path to the current working directory for clickable links
fn relativize_to_cwd(path: &Path) -> String {
    let cwd = match env::current_dir() {
        Ok(cwd) => cwd,
        Err(_) => {
            debug!("Failed to get current directory");
            return path.display().to_string();
        }
    };
    match make_relative(path, &cwd) {
        Some(rel_path) => {
            let result = rel_path.display().to_string();
            trace!("Relativized '{}' to '{}'", path.display(), result);
            result
        }
        None => path.display().to_string(),
    }
}

/// Create a relative path from `base` to `target`. Both must be absolute.
fn make_relative(target: &Path, base: &Path) -> Option<PathBuf> {
    if !target.is_absolute() || !base.is_absolute() {
        return None;
    }
    let target_parts: Vec<Component> = target.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let common = target_parts.iter().zip(&base_parts).take_while(|(t, b)| t == b).count();
    // Different roots or prefixes share nothing.
    if common == 0 {
        return None;
    }

    let mut result = PathBuf::new();
    for _ in &base_parts[common..] {
        result.push("..");
    }
    for component in &target_parts[common..] {
        result.push(component.as_os_str());
    }

    if result.as_os_str().is_empty() { Some(PathBuf::from(".")) } else { Some(result) }
}

pub fn print_report<W: Write>(writer: &mut W, report: &BatchReport) -> io::Result<()> {
    debug!("Printing report for {} files", report.outcomes.len());
    if report.outcomes.is_empty() {
        writeln!(writer, "{} No framework config files found", "✓".green().bold())?;
        writer.flush()?;
        return Ok(());
    }

    for outcome in &report.outcomes {
        print_outcome(writer, outcome)?;
    }

    writeln!(writer, "{}", "─".repeat(60).dimmed())?;
    let failed = report.failed();
    let failed_text =
        if failed > 0 { failed.to_string().red().bold() } else { failed.to_string().normal() };
    writeln!(
        writer,
        "{} resolved, {} failed",
        report.resolved().to_string().green().bold(),
        failed_text
    )?;

    writer.flush()?;
    Ok(())
}

fn print_outcome<W: Write>(writer: &mut W, outcome: &FileOutcome) -> io::Result<()> {
    let display_path = relativize_to_cwd(&outcome.path);
    match &outcome.result {
        Ok(resolution) => {
            let info = &resolution.info;
            let defaulted = match info.output_dir_source {
                FieldSource::Config => String::new(),
                FieldSource::Default => " (default)".dimmed().to_string(),
            };
            writeln!(
                writer,
                "{} {} [{}, {}]",
                "✓".green().bold(),
                display_path.blue(),
                info.framework,
                resolution.shape.label()
            )?;
            writeln!(
                writer,
                "{}  outputDir: {}{}",
                "├──".dimmed(),
                info.output_dir.bold(),
                defaulted
            )?;
            let base = info.base_path.as_deref().unwrap_or("-");
            writeln!(writer, "{}  basePath: {}", "└──".dimmed(), base)?;
        }
        Err(err) => {
            writeln!(writer, "{} {}", "✗".red().bold(), display_path.blue())?;
            writeln!(writer, "{}  {}: {}", "└──".dimmed(), err.kind().red(), err)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonOutcome<'r> {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'r Resolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Serialize)]
struct JsonError {
    kind: &'static str,
    message: String,
}

pub fn print_json<W: Write>(writer: &mut W, report: &BatchReport) -> io::Result<()> {
    let outcomes: Vec<JsonOutcome> = report
        .outcomes
        .iter()
        .map(|outcome| JsonOutcome {
            path: outcome.path.display().to_string(),
            result: outcome.result.as_ref().ok(),
            error: outcome
                .result
                .as_ref()
                .err()
                .map(|err| JsonError { kind: err.kind(), message: err.to_string() }),
        })
        .collect();
    serde_json::to_writer_pretty(&mut *writer, &outcomes)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
