//! Maintain command - compact or rebuild one database

use anyhow::Result;
use dbmaint_core::{MaintenanceReport, MaintenanceRunner, PreparedRun, RunEvent, Strategy};
use serde::Serialize;

use super::{get_event_log, log_event, log_precondition_failure};
use crate::output::{format_size, info, success};

#[derive(Serialize)]
struct MaintainOutput<'a> {
    package_name: &'a str,
    package_version: Option<&'a str>,
    command: &'a str,
    saved_bytes: u64,
    saved_percent: f64,
    #[serde(flatten)]
    report: &'a MaintenanceReport,
}

pub fn run(
    runner: &MaintenanceRunner,
    variant: Option<&str>,
    strategy: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = runner.config();

    let prepared = match runner.prepare(variant, strategy) {
        Ok(prepared) => prepared,
        Err(e) => {
            let event = RunEvent::new("maintenance_failed");
            let event = match variant {
                Some(v) => event.with_variant(v),
                None => event,
            };
            log_precondition_failure(config, &e, event);
            return Err(e.into());
        }
    };

    if !json {
        print_before(&prepared);
    }

    let log = get_event_log(config);
    let report = match runner.execute(&prepared) {
        Ok(report) => report,
        Err(e) => {
            let event = RunEvent::failed(e.to_string())
                .with_variant(prepared.variant.as_str())
                .with_strategy(prepared.strategy.as_str())
                .with_database(&prepared.database);
            log_event(&log, event, config.event_log_retention_days);
            return Err(e.into());
        }
    };
    log_event(
        &log,
        RunEvent::completed(&report),
        config.event_log_retention_days,
    );

    if json {
        let output = MaintainOutput {
            package_name: &prepared.diagnostics.package_name,
            package_version: prepared.diagnostics.package_version.as_deref(),
            command: prepared.command_label(),
            saved_bytes: report.saved_bytes(),
            saved_percent: report.saved_percent(),
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_after(&report);
    Ok(())
}

fn print_before(prepared: &PreparedRun) {
    info(&prepared.diagnostics.summary());
    println!("Database: {}", prepared.database.display());
    println!("Before: {}", format_size(prepared.original_size));
    println!("Running: {}", prepared.command_label());
}

fn print_after(report: &MaintenanceReport) {
    success(match report.strategy {
        Strategy::CompactInPlace => "Database compacted",
        Strategy::Rebuild => "Database rebuilt",
    });
    println!("After: {}", format_size(report.final_size));
    println!(
        "Saved: {} bytes ({:.1}%)",
        report.saved_bytes(),
        report.saved_percent()
    );
    if let Some(counts) = &report.row_counts {
        let rows: u64 = counts.values().sum();
        info(&format!(
            "Verified: {} tables, {} rows unchanged",
            counts.len(),
            rows
        ));
    }
}
