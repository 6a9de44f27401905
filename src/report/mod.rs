pub mod types;

pub use types::{Coverage, Failure, RunReport};

use crate::dataset::ResolvedRows;
use crate::pipeline::RunOutcome;
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Build a RunReport from the dataset resolution and the pipeline outcome.
pub fn build(input_rows: usize, resolved: &ResolvedRows, outcome: &RunOutcome) -> RunReport {
    let scheduled_rows = resolved.rows.len();
    let verified = outcome.verified.len();
    let coverage = if verified == 0 {
        Coverage::Empty
    } else if verified == scheduled_rows {
        Coverage::Complete
    } else {
        Coverage::Partial
    };

    RunReport {
        input_rows,
        missing_url: resolved.missing_url,
        unresolved: resolved.unresolved.len(),
        scheduled_rows,
        groups_scheduled: outcome.groups_scheduled,
        unmatched_rows: outcome.unmatched_rows,
        artifacts_written: outcome.artifacts_written,
        verified,
        group_failures: outcome
            .group_failures
            .iter()
            .map(|f| Failure {
                subject: f.pull_request_url.clone(),
                idx: None,
                reason: format!("{} ({} rows)", f.reason, f.rows),
            })
            .collect(),
        row_failures: outcome
            .row_failures
            .iter()
            .map(|f| Failure {
                subject: f.qualified_filename.clone(),
                idx: Some(f.idx),
                reason: f.reason.clone(),
            })
            .collect(),
        coverage,
    }
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(verified = report.verified, coverage = %report.coverage))]
pub fn output(report: &RunReport, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

fn print_terminal_report(report: &RunReport) {
    println!();
    println!(
        "Rows: {} | Scheduled: {} | Pull requests: {}",
        report.input_rows, report.scheduled_rows, report.groups_scheduled
    );
    println!(
        "Skipped before scheduling: {} without link, {} unresolved identifiers",
        report.missing_url, report.unresolved
    );
    println!(
        "Artifacts written: {} | Not in pull request: {}",
        report.artifacts_written, report.unmatched_rows
    );
    println!();

    print_failures("Failed pull requests", &report.group_failures);
    print_failures("Failed rows", &report.row_failures);

    println!(
        "═══ Verified: {}/{} {} ═══",
        report.verified,
        report.scheduled_rows,
        colorize_coverage(report.coverage)
    );
    println!();
}

fn print_failures(title: &str, failures: &[Failure]) {
    if failures.is_empty() {
        return;
    }
    println!("═══ {} ({}) ═══", title, failures.len());
    for failure in failures {
        match failure.idx {
            Some(idx) => println!("  • [{}] {}: {}", idx, failure.subject, failure.reason),
            None => println!("  • {}: {}", failure.subject, failure.reason),
        }
    }
    println!();
}

fn write_markdown_report(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str("# Corpus run\n\n");
    md.push_str(&format!(
        "**Rows:** {} | **Scheduled:** {} | **Pull requests:** {}\n\n",
        report.input_rows, report.scheduled_rows, report.groups_scheduled
    ));
    md.push_str(&format!(
        "**Skipped:** {} without link, {} unresolved | **Artifacts:** {} | **Not in pull request:** {}\n\n",
        report.missing_url, report.unresolved, report.artifacts_written, report.unmatched_rows
    ));

    for (title, failures) in [
        ("Failed pull requests", &report.group_failures),
        ("Failed rows", &report.row_failures),
    ] {
        if failures.is_empty() {
            continue;
        }
        md.push_str(&format!("## {}\n\n", title));
        for failure in failures {
            match failure.idx {
                Some(idx) => md.push_str(&format!("- **[{}]** `{}`: {}\n", idx, failure.subject, failure.reason)),
                None => md.push_str(&format!("- `{}`: {}\n", failure.subject, failure.reason)),
            }
        }
        md.push('\n');
    }

    md.push_str(&format!(
        "## Verified: {}/{} ({})\n",
        report.verified, report.scheduled_rows, report.coverage
    ));

    std::fs::write(path, md)?;
    Ok(())
}

fn colorize_coverage(coverage: Coverage) -> colored::ColoredString {
    match coverage {
        Coverage::Complete => "COMPLETE".green().bold(),
        Coverage::Partial => "PARTIAL".yellow().bold(),
        Coverage::Empty => "EMPTY".red().bold(),
    }
}
