//! `backup`, `backups` and `restore`

use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::error::{ExitStatus, OrchestratorError};
use crate::observability::{BackupCreatedEvent, BackupFailedEvent, MigrationEvent};
use crate::services::backup_manager::format_size;
use crate::ui;

/// Take an on-demand backup
pub async fn execute(session: &Session, scope: String) -> Result<ExitStatus> {
    let manager = session.backups();
    let spinner = ui::spinner(format!("Creating backup ({})...", scope));
    let outcome = manager.create_backup(&scope, session.policy.timeout).await;
    spinner.finish_and_clear();

    match outcome {
        Ok(backup) => {
            session.events.emit(|metadata| {
                MigrationEvent::BackupCreated(BackupCreatedEvent {
                    metadata,
                    backup_id: backup.id.clone(),
                    scope: backup.scope.clone(),
                    size_bytes: backup.size_bytes,
                })
            });
            ui::print_success(&format!("Backup {} created", backup.id));
            println!("   {:<10} {}", "Scope:".bold(), backup.scope);
            println!("   {:<10} {}", "Medium:".bold(), backup.medium);
            println!("   {:<10} {}", "Snapshot:".bold(), backup.snapshot_path.display());
            println!("   {:<10} {}", "Size:".bold(), format_size(backup.size_bytes));
            Ok(ExitStatus::Success)
        }
        Err(e) => {
            session.events.emit(|metadata| {
                MigrationEvent::BackupFailed(BackupFailedEvent {
                    metadata,
                    scope: scope.clone(),
                    error: e.to_string(),
                    fatal: true,
                })
            });
            Err(OrchestratorError::Backup(e).into())
        }
    }
}

/// List complete backups, oldest first
pub async fn list(session: &Session, json: bool) -> Result<ExitStatus> {
    let manager = session.backups();
    let backups = manager.list().await.map_err(OrchestratorError::from)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(ExitStatus::Success);
    }

    ui::print_header(&format!("Backups in {}", manager.directory().display()));
    if backups.is_empty() {
        ui::print_info("No backups yet");
        return Ok(ExitStatus::Success);
    }
    for backup in &backups {
        println!(
            "   {} {:<20} {:>10}  {}",
            format!("{:<26}", backup.id).cyan(),
            backup.scope,
            format_size(backup.size_bytes),
            backup.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
        );
    }
    Ok(ExitStatus::Success)
}

/// Restore the target from a backup; always asks unless `--yes`
pub async fn restore(session: &Session, backup_id: String, yes: bool) -> Result<ExitStatus> {
    let manager = session.backups();
    let backup = manager.get(&backup_id).await.map_err(OrchestratorError::from)?;

    ui::print_header(&format!("Restore {}", backup.id));
    println!("   {:<10} {}", "Scope:".bold(), backup.scope);
    println!(
        "   {:<10} {}",
        "Created:".bold(),
        backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("   {:<10} {}", "Size:".bold(), format_size(backup.size_bytes));
    println!();

    if !yes {
        ui::print_warning("Restoring overwrites the current state of the target system");
        if !ui::confirm(&format!("Restore backup {}?", backup.id))? {
            return Err(OrchestratorError::Aborted {
                reason: "restore not confirmed".to_string(),
            }
            .into());
        }
    }

    let spinner = ui::spinner(format!("Restoring {}...", backup.id));
    let outcome = manager.restore(&backup.id, session.policy.timeout).await;
    spinner.finish_and_clear();
    outcome.map_err(OrchestratorError::from)?;

    ui::print_success(&format!("Backup {} restored", backup.id));
    Ok(ExitStatus::Success)
}
