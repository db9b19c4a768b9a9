//! `status` and `history`: what the ledger knows about each migration
//!
//! Status joins the catalog with the latest ledger entry per migration, so
//! it also shows migrations that never ran, migrations whose file changed
//! since their last run, and ledger entries for files that are gone.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;

use super::{parse_category, Session};
use crate::domain::{Category, ExecutionResult, MigrationDescriptor};
use crate::error::ExitStatus;
use crate::services::LedgerEntry;
use crate::ui;

/// One line of `migrate status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRow {
    name: String,
    category: Category,
    /// Present in the current catalog
    discovered: bool,
    /// File content differs from what last ran
    changed_since_run: bool,
    last: Option<ExecutionResult>,
}

fn status_rows(units: &[&MigrationDescriptor], mut latest: BTreeMap<(Category, String), LedgerEntry>) -> Vec<StatusRow> {
    let mut rows: Vec<StatusRow> = units
        .iter()
        .map(|unit| {
            let entry = latest.remove(&unit.key());
            StatusRow {
                name: unit.name.clone(),
                category: unit.category,
                discovered: true,
                changed_since_run: entry
                    .as_ref()
                    .is_some_and(|e| e.fingerprint != unit.content_fingerprint),
                last: entry.map(|e| e.result),
            }
        })
        .collect();

    // Whatever is left ran once but is no longer in the catalog
    rows.extend(latest.into_values().map(|entry| StatusRow {
        name: entry.result.name.clone(),
        category: entry.result.category,
        discovered: false,
        changed_since_run: false,
        last: Some(entry.result),
    }));
    rows
}

/// `3h 12m ago`, truncated to minutes
fn ago(at: DateTime<Utc>) -> String {
    let elapsed = (Utc::now() - at).num_seconds().max(0) as u64;
    if elapsed < 60 {
        return "just now".to_string();
    }
    let rounded = std::time::Duration::from_secs(elapsed - elapsed % 60);
    format!("{} ago", humantime::format_duration(rounded))
}

pub async fn execute(session: &Session, json: bool) -> Result<ExitStatus> {
    let (registry, _) = session.discover()?;
    let latest = session.ledger().latest_per_migration().await?;
    let rows = status_rows(&registry.list(None), latest);

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(ExitStatus::Success);
    }

    ui::print_header(&format!("Migration status ({})", session.policy.environment));
    if rows.is_empty() {
        ui::print_info("No migrations discovered and nothing recorded");
        return Ok(ExitStatus::Success);
    }

    println!(
        "   {:<12} {:<44} {:<10} {}",
        "STATUS".bold(),
        "MIGRATION".bold(),
        "OPERATION".bold(),
        "WHEN".bold()
    );
    for row in &rows {
        let qualified = format!("{}/{}", row.category, row.name);
        let mut flags = Vec::new();
        if row.changed_since_run {
            flags.push("changed since last run".yellow().to_string());
        }
        if !row.discovered {
            flags.push("not in catalog".dimmed().to_string());
        }

        match &row.last {
            Some(last) => {
                let when = last
                    .finished_at
                    .or(last.started_at)
                    .map(ago)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "   {} {:<44} {:<10} {} {}",
                    ui::padded_status(last.status, 12),
                    qualified,
                    last.operation.to_string(),
                    when.dimmed(),
                    flags.join(" ")
                );
            }
            None => println!(
                "   {} {:<44} {:<10} {}",
                format!("{:<12}", "never run").dimmed(),
                qualified,
                "-",
                flags.join(" ")
            ),
        }
    }

    let never_run = rows.iter().filter(|r| r.last.is_none()).count();
    let changed = rows.iter().filter(|r| r.changed_since_run).count();
    println!();
    println!(
        "{} migration(s), {} never run, {} changed since last run",
        rows.len(),
        never_run,
        changed
    );
    Ok(ExitStatus::Success)
}

/// Every recorded result of one migration, oldest first
pub async fn history(session: &Session, name: String, category: String, json: bool) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let name = match name.rsplit_once('.') {
        Some((stem, "py" | "sh" | "bash" | "sql")) => stem.to_string(),
        _ => name,
    };
    let entries = session.ledger().history_entries(&name, category).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitStatus::Success);
    }

    ui::print_header(&format!("History of {}/{}", category, name));
    if entries.is_empty() {
        ui::print_info("Nothing recorded yet");
        return Ok(ExitStatus::Success);
    }
    for entry in &entries {
        println!(
            "{} {}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
            format!("fingerprint {}", entry.fingerprint).dimmed()
        );
        ui::print_result(&entry.result);
    }
    Ok(ExitStatus::Success)
}
