//! Evict command.

use super::open_services;
use anyhow::{bail, Result};
use bridge_core::{BridgeError, ProjectState, SwapJob};
use console::style;
use std::path::Path;

/// Evict one project now, regardless of watermarks.
pub fn run(config: &Path, project: &str) -> Result<()> {
    let services = open_services(config)?;
    let (job, settings) = services.require_swap_job()?;
    let compression = settings.compression_method;
    let db = services.db_store().clone();

    let state = services
        .context_store()
        .in_context_with_lock(project, |scope| {
            let state = db.get_project_state(scope.context())?;
            if state == ProjectState::Present {
                job.evict(scope.context())?;
            }
            Ok::<_, BridgeError>(state)
        })?;

    match state {
        ProjectState::Present => println!(
            "{} Evicted {} ({})",
            style("✓").green(),
            style(project).cyan(),
            compression
        ),
        ProjectState::Swapped => println!(
            "{} {} is already swapped out",
            style("ℹ").blue(),
            style(project).cyan()
        ),
        ProjectState::NotPresent => bail!("Project {} is not present", project),
    }
    Ok(())
}
