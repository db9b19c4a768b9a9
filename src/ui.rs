// Terminal UI utilities
// Print helpers, result rendering, confirmation prompts and spinners.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

use crate::domain::{ExecutionResult, ExecutionStatus};
use crate::services::BatchReport;

pub fn print_header(title: &str) {
    println!();
    println!(
        "{}",
        "╔════════════════════════════════════════════════════════════╗".bright_blue()
    );
    println!("{}", format!("║  {:<58}║", title).bright_blue());
    println!(
        "{}",
        "╚════════════════════════════════════════════════════════════╝".bright_blue()
    );
    println!();
}

pub fn print_success(message: &str) {
    println!("{}", format!("✅ {}", message).bright_green().bold());
}

pub fn print_error(message: &str) {
    eprintln!("{}", format!("❌ {}", message).bright_red().bold());
}

pub fn print_info(message: &str) {
    println!("{}", format!("ℹ️  {}", message).bright_cyan());
}

pub fn print_warning(message: &str) {
    println!("{}", format!("⚠️  {}", message).bright_yellow());
}

/// Status label padded to `width` before colouring, for aligned columns
pub fn padded_status(status: ExecutionStatus, width: usize) -> ColoredString {
    paint_status(status, &format!("{:<width$}", status.label(), width = width))
}

fn paint_status(status: ExecutionStatus, label: &str) -> ColoredString {
    match status {
        ExecutionStatus::Succeeded => label.green(),
        ExecutionStatus::Skipped => label.cyan(),
        ExecutionStatus::Pending | ExecutionStatus::Running => label.dimmed(),
        ExecutionStatus::RolledBack => label.yellow(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => label.red().bold(),
    }
}

/// Milliseconds rounded for display, e.g. `1s 250ms`
pub fn format_duration_ms(ms: u64) -> String {
    humantime::format_duration(Duration::from_millis(ms)).to_string()
}

/// One result: status line, then notes, failure summary and rollback alert
pub fn print_result(result: &ExecutionResult) {
    println!(
        "   {} {} {}",
        padded_status(result.status, 12),
        result.qualified_name().bold(),
        format!("({}, {})", result.operation, format_duration_ms(result.duration_ms)).dimmed()
    );
    if let Some(backup) = &result.backup_reference {
        println!("      {} {}", "backup:".dimmed(), backup);
    }
    for note in &result.notes {
        println!("      {} {}", "note:".dimmed(), note);
    }
    if let Some(summary) = result.failure_summary() {
        for line in summary.lines() {
            println!("      {}", line.red());
        }
    }
    if let Some(tail) = &result.output_tail {
        for line in tail.lines() {
            println!("      {} {}", "|".dimmed(), line.dimmed());
        }
    }
    if let Some(rollback) = &result.rollback_error {
        println!(
            "      {}",
            format!("ROLLBACK FAILED: {}", rollback.message).bright_red().bold()
        );
        println!(
            "      {}",
            "Manual intervention required: the target may be in an intermediate state.".bright_red()
        );
        if let Some(backup) = &result.backup_reference {
            println!("      {} migrate restore {}", "Restore with:".bright_red(), backup);
        }
    }
}

pub fn print_batch_summary(report: &BatchReport) {
    println!();
    println!(
        "{} {} succeeded, {} failed, {} rolled back, {} skipped, {} not attempted ({})",
        "Summary:".bold(),
        report.count(ExecutionStatus::Succeeded).to_string().green(),
        (report.count(ExecutionStatus::Failed) + report.count(ExecutionStatus::TimedOut))
            .to_string()
            .red(),
        report.count(ExecutionStatus::RolledBack).to_string().yellow(),
        report.count(ExecutionStatus::Skipped).to_string().cyan(),
        report.count(ExecutionStatus::Pending),
        format_duration_ms(report.duration_ms)
    );
    if let Some(blocker) = &report.halted_by {
        print_warning(&format!("Batch halted after {} failed", blocker));
    }
    if report.cancelled {
        print_warning("Batch cancelled; migrations not yet started were left pending");
    }
}

/// Ask a yes/no question on stdin; anything but `y`/`yes` (including EOF) is no
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let answer = input.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
