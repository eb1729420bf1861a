//! Register command.

use super::open_services;
use anyhow::{bail, Result};
use bridge_core::BridgeError;
use console::style;
use std::path::Path;

/// Record `version` as the latest mirrored snapshot of `project`.
pub fn run(config: &Path, project: &str, version: i64) -> Result<()> {
    if version < 1 {
        bail!("Version must be positive, got {}", version);
    }
    bridge_core::validate_project_name(project)?;

    let services = open_services(config)?;
    let db = services.db_store();
    services
        .context_store()
        .in_context_with_lock(project, |scope| {
            db.set_latest_version_for_project(scope.context(), version)?;
            Ok::<_, BridgeError>(())
        })?;

    println!(
        "{} Registered {} at version {}",
        style("✓").green(),
        style(project).cyan(),
        version
    );
    Ok(())
}
