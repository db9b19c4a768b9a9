//! `list` and `show`: catalog inspection without touching the target

use anyhow::Result;
use colored::Colorize;

use super::{parse_category, print_discovery_problems, Session};
use crate::config::SourceRoot;
use crate::domain::{EntryTarget, MigrationDescriptor};
use crate::error::ExitStatus;
use crate::ui;

/// List migrations grouped by category, in execution order
pub async fn execute(session: &Session, category: Option<String>, json: bool) -> Result<ExitStatus> {
    let filter = category.as_deref().map(parse_category).transpose()?;
    let (registry, _) = session.discover()?;
    if let Some(category) = filter {
        registry.ensure_enabled(category)?;
    }
    let units = registry.list(filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(ExitStatus::Success);
    }

    ui::print_header(&format!("Migrations ({})", session.policy.environment));

    for root in registry.roots() {
        if filter.is_some_and(|c| c != root.category) {
            continue;
        }
        if !root.enabled {
            println!("{}", format!("{} (disabled)", root_heading(root)).dimmed());
            println!();
            continue;
        }

        println!("{}", root_heading(root).bold());
        println!(
            "   {}",
            format!("[{}] priority {} · {}", root.category, root.priority, root.root.display()).dimmed()
        );
        let members: Vec<&&MigrationDescriptor> = units.iter().filter(|u| u.category == root.category).collect();
        if members.is_empty() {
            println!("   {}", "(none)".dimmed());
        }
        for unit in members {
            println!(
                "   {} {} {}",
                format!("{:<40}", unit.name).cyan(),
                format!("{:<24}", flags(unit)),
                unit.summary().unwrap_or("").dimmed()
            );
        }
        println!();
    }

    println!("{} migration(s)", units.len());
    print_discovery_problems(&registry);
    Ok(ExitStatus::Success)
}

/// `Declarative SQL: <configured description>`
fn root_heading(root: &SourceRoot) -> String {
    if root.description.is_empty() {
        root.category.name().to_string()
    } else {
        format!("{}: {}", root.category.name(), root.description)
    }
}

/// `run,rollback,verify` plus dry-run and parallel markers
fn flags(unit: &MigrationDescriptor) -> String {
    let mut flags = unit.capability_summary();
    if unit.supports_dry_run {
        flags.push_str(" +dry-run");
    }
    if unit.independent {
        flags.push_str(" ∥");
    }
    flags
}

/// Print one descriptor in full
pub async fn show(session: &Session, name: String, category: String) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let (registry, _) = session.discover()?;
    let unit = registry.find(&name, category)?;

    ui::print_header(&unit.qualified_name());
    println!("{:<14} {}", "Category:".bold(), unit.category.name());
    println!("{:<14} {}", "Source:".bold(), unit.source_path.display());
    println!("{:<14} {}", "Fingerprint:".bold(), unit.content_fingerprint);
    println!("{:<14} {}", "Capabilities:".bold(), unit.capability_summary());
    println!("{:<14} {}", "Dry run:".bold(), if unit.supports_dry_run { "supported" } else { "structural validation only" });
    println!("{:<14} {}", "Independent:".bold(), unit.independent);

    println!();
    println!("{}", "Entry points:".bold());
    for (entry, target) in &unit.entry_points {
        let target = match target {
            EntryTarget::Function(function) => format!("{}()", function),
            EntryTarget::File(path) => path.display().to_string(),
        };
        println!("   {:<10} {}", entry.to_string(), target);
    }

    if !unit.attributes.is_empty() {
        println!();
        println!("{}", "Attributes:".bold());
        for (key, value) in &unit.attributes {
            println!("   {:<14} {}", key, value);
        }
    }

    if let Some(doc) = &unit.documentation {
        println!();
        println!("{}", "Documentation:".bold());
        for line in doc.lines() {
            println!("   {}", line);
        }
    }

    for warning in &unit.warnings {
        ui::print_warning(warning);
    }

    if let Some(last) = session.ledger().last_result(&unit.name, unit.category).await? {
        println!();
        println!("{}", "Last recorded result:".bold());
        ui::print_result(&last);
    }
    Ok(ExitStatus::Success)
}
