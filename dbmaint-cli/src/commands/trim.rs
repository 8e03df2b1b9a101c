//! Trim command - delete old rows from the raw table
//!
//! Without `--read-write` this only reports what would go. With it, the
//! operator gets a warning and a few seconds to press Ctrl+C before
//! anything is deleted; an interrupt exits with code 3.

use std::time::Duration;

use anyhow::{Context, Result};
use dbmaint_core::domain::{format_day, RAW_TABLE};
use dbmaint_core::{Error, MaintenanceRunner, PreparedTrim, RunEvent, TrimSelection};

use super::{get_event_log, log_event, log_precondition_failure};
use crate::output::{info, success, warning};

pub fn run(
    runner: &MaintenanceRunner,
    variant: Option<&str>,
    selection: TrimSelection,
    read_write: bool,
    warn: Duration,
    json: bool,
) -> Result<()> {
    let config = runner.config();

    let prepared = match runner.prepare_trim(variant, selection) {
        Ok(prepared) => prepared,
        Err(e) => {
            let event = RunEvent::new("trim_failed").with_strategy("trim");
            let event = match variant {
                Some(v) => event.with_variant(v),
                None => event,
            };
            log_precondition_failure(config, &e, event);
            return Err(e.into());
        }
    };

    // Keep stdout clean for the JSON document
    let say = |msg: &str| {
        if json {
            eprintln!("{}", msg);
        } else {
            println!("{}", msg);
        }
    };

    if !json {
        info(&prepared.diagnostics.summary());
        println!("Database: {}", prepared.database.display());
    }

    let Some(plan) = prepared.plan else {
        say(&format!("No rows in {}, nothing to trim.", RAW_TABLE));
        return print_dry_run(&prepared, json);
    };
    let begin = format_day(plan.window.begin);
    let end = format_day(plan.window.end);

    if !read_write || plan.affected == 0 {
        say(&format!("Not deleting data from {} to {}.", begin, end));
        say(&format!("This would affect {} entries.", plan.affected));
        return print_dry_run(&prepared, json);
    }

    if json {
        eprintln!("About to DELETE data from {} to {}.", begin, end);
    } else {
        warning(&format!("About to DELETE data from {} to {}.", begin, end));
    }
    say(&format!("This will affect {} entries.", plan.affected));
    say(&format!(
        "Interrupt within {} seconds to prevent that.",
        warn.as_secs()
    ));

    let log = get_event_log(config);
    let failed = |message: String| {
        RunEvent::new("trim_failed")
            .with_variant(prepared.variant.as_str())
            .with_strategy("trim")
            .with_database(&prepared.database)
            .with_error(message)
    };

    if let Err(e) = wait_or_interrupt(warn) {
        log_event(&log, failed(format!("{:#}", e)), config.event_log_retention_days);
        return Err(e);
    }

    say("DELETING data...");
    let report = match runner.execute_trim(&prepared) {
        Ok(report) => report,
        Err(e) => {
            log_event(&log, failed(e.to_string()), config.event_log_retention_days);
            return Err(e.into());
        }
    };
    log_event(
        &log,
        RunEvent::trimmed(&report),
        config.event_log_retention_days,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        success(&format!("Done. Deleted {} entries.", report.affected));
    }
    Ok(())
}

fn print_dry_run(prepared: &PreparedTrim, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&prepared.dry_run_report())?
        );
    }
    Ok(())
}

/// Sleep for `warn`, or fail with `Error::Interrupted` on Ctrl+C
fn wait_or_interrupt(warn: Duration) -> Result<()> {
    if warn.is_zero() {
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handling")?;

    let outcome: Result<()> = runtime.block_on(async {
        tokio::select! {
            _ = tokio::time::sleep(warn) => Ok(()),
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => Err(Error::Interrupted.into()),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to listen for Ctrl+C")),
            },
        }
    });
    outcome
}
