//! Project listing command.

use super::{open_services, timestamp};
use anyhow::Result;
use bridge_core::ProjectState;
use console::style;
use std::path::Path;

/// List every project row, oldest access first within each state.
pub fn run(config: &Path) -> Result<()> {
    let services = open_services(config)?;
    let db = services.db_store();

    let names = db.get_project_names()?;
    if names.is_empty() {
        println!("No projects");
        return Ok(());
    }

    println!(
        "{:<32} {:<12} {:>10}  {}",
        style("PROJECT").bold(),
        style("STATE").bold(),
        style("VERSION").bold(),
        style("LAST ACCESSED").bold()
    );
    for name in names {
        // Rows can vanish between listing and reading; skip those.
        let Some(record) = db.get_project(&name)? else {
            continue;
        };
        let state = match record.state() {
            ProjectState::Present => style(record.state().to_string()).green(),
            ProjectState::Swapped => style(record.state().to_string()).yellow(),
            ProjectState::NotPresent => style(record.state().to_string()).dim(),
        };
        println!(
            "{:<32} {:<12} {:>10}  {}",
            name,
            state,
            record.version,
            timestamp(record.last_accessed)
        );
    }
    Ok(())
}
