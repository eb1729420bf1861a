//! Status command.

use super::{gib, open_services, timestamp};
use anyhow::{anyhow, Result};
use bridge_core::{ProjectRecord, Services, SwapJob};
use console::style;
use serde_json::json;
use std::path::Path;

/// Show one project's row, or a summary of the whole root.
pub fn run(config: &Path, project: Option<&str>, as_json: bool) -> Result<()> {
    let services = open_services(config)?;
    match project {
        Some(name) => project_status(&services, name, as_json),
        None => summary(&services, as_json),
    }
}

fn project_status(services: &Services, name: &str, as_json: bool) -> Result<()> {
    let record = services
        .db_store()
        .get_project(name)?
        .ok_or_else(|| anyhow!("Unknown project: {}", name))?;
    let on_disk = services.repo_store().exists(name);
    let size = services.repo_store().project_size(name)?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "project": name,
                "state": record.state(),
                "record": record,
                "on_disk": on_disk,
                "size_bytes": size,
            }))?
        );
        return Ok(());
    }

    print_record(name, &record);
    println!("  On disk:        {}", yes_no(on_disk));
    println!("  Size:           {}", style(gib(size)).cyan());
    Ok(())
}

fn print_record(name: &str, record: &ProjectRecord) {
    println!("{} {}", style("Project").bold(), style(name).cyan());
    println!("  State:          {}", record.state());
    println!("  Version:        {}", record.version);
    println!("  Last accessed:  {}", timestamp(record.last_accessed));
    println!(
        "  Compression:    {}",
        record.swap_compression.as_deref().unwrap_or("-")
    );
    println!("  Swapped at:     {}", timestamp(record.swap_time));
    println!("  Restored at:    {}", timestamp(record.restore_time));
}

fn summary(services: &Services, as_json: bool) -> Result<()> {
    let total_size = services.repo_store().total_size()?;
    let total_projects = services.db_store().get_num_projects()?;
    let resident = services.db_store().get_num_unswapped_projects()?;
    let settings = services.swap_job().settings().cloned();

    if as_json {
        let swap = settings.as_ref().map(|s| {
            json!({
                "min_projects": s.min_projects,
                "low_watermark_bytes": s.low_watermark_bytes,
                "high_watermark_bytes": s.high_watermark_bytes,
                "interval_millis": s.interval.as_millis() as u64,
                "compression_method": s.compression_method,
            })
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "root_dir": services.config().storage.root_dir,
                "total_size_bytes": total_size,
                "projects": total_projects,
                "resident_projects": resident,
                "swap": swap,
            }))?
        );
        return Ok(());
    }

    println!("{}", style("Bridge Status:").bold());
    println!(
        "  Root:               {}",
        services.config().storage.root_dir.display()
    );
    println!("  Disk usage:         {}", style(gib(total_size)).cyan());
    println!("  Projects:           {}", style(total_projects).cyan());
    println!("  Resident projects:  {}", style(resident).green());

    match settings {
        Some(s) => {
            let usage = if total_size > s.high_watermark_bytes {
                style("above high watermark").yellow()
            } else if total_size > s.low_watermark_bytes {
                style("between watermarks").cyan()
            } else {
                style("below low watermark").green()
            };
            println!();
            println!("{}", style("Swap:").bold());
            println!("  Low watermark:      {}", gib(s.low_watermark_bytes));
            println!("  High watermark:     {}", gib(s.high_watermark_bytes));
            println!("  Min projects:       {}", s.min_projects);
            println!("  Compression:        {}", s.compression_method);
            println!("  Usage:              {}", usage);
        }
        None => {
            println!();
            println!("{} Swap is not configured", style("ℹ").blue());
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").yellow()
    }
}
