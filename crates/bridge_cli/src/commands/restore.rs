//! Restore command.

use super::open_services;
use anyhow::{bail, Result};
use bridge_core::{ProjectState, SwapJob};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Restore one swapped project to local disk.
pub fn run(config: &Path, project: &str) -> Result<()> {
    let services = open_services(config)?;
    // Without [swap] this is a no-op job that only fails for swapped projects.
    let job = services.swap_job().clone();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Restoring {}...", project));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let before = services.db_store().get_project(project)?.map(|r| r.state());
    let outcome = services
        .context_store()
        .in_context_with_lock(project, |scope| {
            job.restore_if_swapped(scope.context())
        });
    spinner.finish_and_clear();

    match (before, outcome?) {
        (_, ProjectState::NotPresent) => bail!("Project {} is not present", project),
        (Some(ProjectState::Swapped), _) => println!(
            "{} Restored {} ({})",
            style("✓").green(),
            style(project).cyan(),
            super::gib(services.repo_store().project_size(project)?)
        ),
        _ => println!(
            "{} {} is already on disk",
            style("ℹ").blue(),
            style(project).cyan()
        ),
    }
    Ok(())
}
