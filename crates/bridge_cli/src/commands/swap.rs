//! Swap job commands.

use super::{gib, open_services};
use anyhow::Result;
use bridge_core::{SwapJob, SwapReport};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead};
use std::path::Path;
use std::time::Duration;

/// Run one pass and print what it did.
pub fn run_once(config: &Path) -> Result<()> {
    let services = open_services(config)?;
    let (job, _) = services.require_swap_job()?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message("Running swap pass...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let report = job.run_once();
    spinner.finish_and_clear();

    print_report(&report?);
    Ok(())
}

/// Run the periodic job until stdin reaches EOF.
pub fn serve(config: &Path) -> Result<()> {
    let services = open_services(config)?;
    let (job, settings) = services.require_swap_job()?;
    job.start()?;

    println!(
        "{} Swap job running every {}s; close stdin (Ctrl-D) to stop",
        style("→").cyan(),
        settings.interval.as_secs()
    );
    for line in io::stdin().lock().lines() {
        if line?.trim() == "q" {
            break;
        }
    }

    println!("{} Stopping...", style("→").cyan());
    services.shutdown();
    println!(
        "{} Stopped after {} runs",
        style("✓").green(),
        job.runs_completed()
    );
    Ok(())
}

fn print_report(report: &SwapReport) {
    println!("{}", style("Swap Report:").bold());
    println!("  Initial size:       {}", style(gib(report.initial_size)).cyan());
    println!("  Final size:         {}", style(gib(report.final_size)).cyan());
    println!(
        "  Resident projects:  {} of {}",
        style(report.resident_projects).green(),
        report.total_projects
    );
    println!(
        "  Evicted:            {}",
        if report.evicted.is_empty() {
            style(report.evicted.len()).green()
        } else {
            style(report.evicted.len()).yellow()
        }
    );
    for name in &report.evicted {
        println!("    {} {}", style("→").cyan(), name);
    }
    if !report.skipped.is_empty() {
        println!("  Failed evictions:   {}", style(report.skipped.len()).red());
        for name in &report.skipped {
            println!("    {} {}", style("×").red(), name);
        }
    }
    if report.aborted {
        println!();
        println!(
            "{} Run stopped early; the next scheduled run will continue",
            style("⚠").yellow()
        );
    }
}
