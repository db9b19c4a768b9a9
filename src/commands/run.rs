//! `run`, `run-all` and `dry-run`

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use super::{exit_status_for_results, parse_category, print_discovery_problems, Session};
use crate::error::ExitStatus;
use crate::services::BatchOptions;
use crate::ui;

/// Run a single migration under the resolved policy
pub async fn execute(session: &Session, name: String, category: String, yes: bool) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let (registry, analyzer) = session.discover()?;
    let unit = registry.find(&name, category)?;

    ui::print_header(&format!("Run {}", unit.qualified_name()));
    session.print_policy();
    session.confirm_mutation(&format!("run {}", unit.qualified_name()), yes)?;

    let engine = session.engine(analyzer);
    let spinner = ui::spinner(format!("Running {}...", unit.qualified_name()));
    let result = engine.run_one(unit).await;
    spinner.finish_and_clear();

    ui::print_result(&result);
    Ok(exit_status_for_results([&result]))
}

/// Dry-run a single migration; nothing is recorded
pub async fn dry_run(session: &Session, name: String, category: String) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let (registry, analyzer) = session.discover()?;
    let unit = registry.find(&name, category)?;

    if !unit.supports_dry_run {
        ui::print_info(&format!(
            "{} has no dry-run mode; validating its structure instead",
            unit.qualified_name()
        ));
    }

    let engine = session.engine(analyzer);
    let result = engine.dry_run(unit).await;
    ui::print_result(&result);
    Ok(exit_status_for_results([&result]))
}

/// Run every discovered migration (or one category) in execution order
pub async fn run_all(
    session: &Session,
    category: Option<String>,
    continue_on_failure: bool,
    dry_run: bool,
    yes: bool,
) -> Result<ExitStatus> {
    let filter = category.as_deref().map(parse_category).transpose()?;
    let (registry, analyzer) = session.discover()?;
    if let Some(category) = filter {
        registry.ensure_enabled(category)?;
    }
    print_discovery_problems(&registry);

    let units = registry.list(filter);
    let title = if dry_run { "Dry run" } else { "Run all" };
    ui::print_header(&format!("{} ({} migrations)", title, units.len()));
    if units.is_empty() {
        ui::print_info("No migrations to run");
        return Ok(ExitStatus::Success);
    }

    session.print_policy();
    for (position, unit) in units.iter().enumerate() {
        println!("   {:>3}. {}", position + 1, unit.qualified_name().dimmed());
    }
    println!();

    if !dry_run {
        session.confirm_mutation(&format!("run {} migrations", units.len()), yes)?;
    }

    let engine = session.engine(analyzer);
    session.cancel_on_interrupt();

    let options = BatchOptions {
        stop_on_failure: !continue_on_failure,
        dry_run,
    };
    info!("Starting batch of {} migrations", units.len());
    let spinner = ui::spinner(format!("Running {} migrations...", units.len()));
    let report = engine.run_batch(&units, options).await;
    spinner.finish_and_clear();

    for result in &report.results {
        ui::print_result(result);
    }
    ui::print_batch_summary(&report);

    if report.is_success() {
        ui::print_success(if dry_run { "Dry run completed" } else { "All migrations completed" });
    }
    Ok(exit_status_for_results(&report.results))
}
