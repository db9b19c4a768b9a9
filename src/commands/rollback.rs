//! `rollback`: invoke a migration's rollback entry point directly
//!
//! The result is recorded in the ledger like a run. A failed rollback
//! leaves the target in whatever state the entry point reached, so the
//! latest backup is pointed out for a manual restore.

use anyhow::Result;

use super::{exit_status_for_results, parse_category, Session};
use crate::domain::{Capability, ExecutionStatus};
use crate::error::ExitStatus;
use crate::services::require_capability;
use crate::ui;

pub async fn execute(session: &Session, name: String, category: String, yes: bool) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let (registry, analyzer) = session.discover()?;
    let unit = registry.find(&name, category)?;

    // Refuse before prompting when there is nothing to invoke
    require_capability(unit, Capability::Rollbackable)?;

    ui::print_header(&format!("Rollback {}", unit.qualified_name()));
    session.print_policy();
    session.confirm_mutation(&format!("roll back {}", unit.qualified_name()), yes)?;

    let engine = session.engine(analyzer);
    let spinner = ui::spinner(format!("Rolling back {}...", unit.qualified_name()));
    let result = engine.rollback(unit).await?;
    spinner.finish_and_clear();

    ui::print_result(&result);
    if result.status != ExecutionStatus::Succeeded {
        if let Ok(backups) = session.backups().list().await {
            if let Some(latest) = backups.last() {
                ui::print_warning(&format!(
                    "Latest backup is {} ({}); restore with `migrate restore {}`",
                    latest.id, latest.scope, latest.id
                ));
            }
        }
    }
    Ok(exit_status_for_results([&result]))
}
