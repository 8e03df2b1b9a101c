//! History command - show recent maintenance runs

use anyhow::{bail, Result};
use colored::Colorize;
use dbmaint_core::config::Config;
use dbmaint_core::{EventLog, RunEntry};

use crate::output::{create_table, format_size, format_timestamp};

pub fn run(config: &Config, limit: usize, errors_only: bool, json: bool) -> Result<()> {
    let Some(dir) = &config.event_log_dir else {
        bail!("No event log configured (set eventLogDir in the settings file)");
    };
    let log = EventLog::new(dir, env!("CARGO_PKG_VERSION"))?;

    let entries = if errors_only {
        log.get_errors(limit)?
    } else {
        log.get_recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    print_table(&entries);

    let failures: Vec<&RunEntry> = entries
        .iter()
        .filter(|e| e.error_message.is_some())
        .collect();
    if !errors_only && !failures.is_empty() {
        println!();
        println!("{}", "Recent Errors:".red().bold());
        for entry in failures {
            println!(
                "  {} {}",
                format_timestamp(entry.timestamp).dimmed(),
                entry.error_message.as_deref().unwrap_or_default()
            );
        }
    }

    Ok(())
}

fn print_table(entries: &[RunEntry]) {
    let mut table = create_table();
    table.set_header(vec![
        "Time", "", "Variant", "Strategy", "Engine", "Before", "After", "Deleted",
    ]);

    for entry in entries {
        let indicator = if entry.error_message.is_some() {
            "!".red().to_string()
        } else {
            " ".to_string()
        };
        let size = |s: Option<u64>| s.map(format_size).unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            format_timestamp(entry.timestamp),
            indicator,
            entry.variant.clone().unwrap_or_else(|| "-".to_string()),
            entry.strategy.clone().unwrap_or_else(|| "-".to_string()),
            entry.engine.clone().unwrap_or_else(|| "-".to_string()),
            size(entry.original_size),
            size(entry.final_size),
            entry
                .rows_deleted
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
}
