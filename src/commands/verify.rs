//! `verify`: invoke a migration's verify entry point

use anyhow::Result;

use super::{exit_status_for_results, parse_category, Session};
use crate::error::ExitStatus;
use crate::ui;

/// Read-only check; the result is printed but not recorded
pub async fn execute(session: &Session, name: String, category: String) -> Result<ExitStatus> {
    let category = parse_category(&category)?;
    let (registry, analyzer) = session.discover()?;
    let unit = registry.find(&name, category)?;

    let engine = session.engine(analyzer);
    let result = engine.verify(unit).await?;
    ui::print_result(&result);

    let status = exit_status_for_results([&result]);
    if status == ExitStatus::Success {
        ui::print_success(&format!("{} verified", unit.qualified_name()));
    }
    Ok(status)
}
