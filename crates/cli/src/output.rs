//! Terminal rendering of a seeding run.
//!
//! Status lines go through owo-colors and degrade to plain text when the
//! stream isn't a color terminal. `--output json` bypasses all of it and
//! prints the serialized [`ReconcileReport`].

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use dtseed_lib::reconcile::{Action, ReconcileReport};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// Print `report` in the requested format.
pub fn print_report(report: &ReconcileReport, format: OutputFormat) -> anyhow::Result<()> {
  if format.is_json() {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    println!("{json}");
    return Ok(());
  }

  match report.action {
    Action::Converged => {
      print_info(&headline(report));
      return Ok(());
    }
    Action::Create { .. } | Action::Delete { .. } => print_success(&headline(report)),
  }

  for (label, value) in stats(report) {
    print_stat(label, &value);
  }
  for warning in warnings(report) {
    print_warning(&warning);
  }
  Ok(())
}

fn headline(report: &ReconcileReport) -> String {
  match report.action {
    Action::Converged => format!("Already at {} project(s), nothing to do", report.current),
    Action::Create { count } => {
      let created = report.attempted.saturating_sub(report.failed);
      format!("Created {created} of {count} project(s)")
    }
    Action::Delete { count } => format!("Deleted {} of {count} project(s)", report.deleted),
  }
}

fn stats(report: &ReconcileReport) -> Vec<(&'static str, String)> {
  let mut stats = vec![(
    "Projects",
    format!("{} {} {}", report.current, symbols::ARROW, report.desired),
  )];
  if let Action::Create { .. } = report.action {
    stats.push(("Attempted", report.attempted.to_string()));
    stats.push(("Failed", report.failed.to_string()));
  }
  stats.push(("Elapsed", format_duration(report.elapsed)));
  if let Some(elapsed) = report.elapsed_with_completion {
    stats.push(("Elapsed (incl. processing)", format_duration(elapsed)));
  }
  if let Some(completions) = &report.completions {
    stats.push(("Processed", completions.processed.to_string()));
  }
  stats
}

fn warnings(report: &ReconcileReport) -> Vec<String> {
  let mut warnings = Vec::new();
  if let Some(completions) = &report.completions {
    if completions.timed_out > 0 {
      warnings.push(format!(
        "{} BOM(s) still processing at the deadline",
        completions.timed_out
      ));
    }
    if completions.failed > 0 {
      warnings.push(format!("{} processing wait(s) failed", completions.failed));
    }
  }
  if report.failed > 0 {
    warnings.push(format!("{} upload(s) failed and were skipped", report.failed));
  }
  warnings
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}
