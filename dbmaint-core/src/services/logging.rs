//! Event log - run history stored in DuckDB
//!
//! Every maintenance run that got past argument validation and the identity
//! check leaves one row in `maintenance-log.duckdb`: what was run, against
//! which file, the sizes before and after (or the rows a trim deleted), and
//! the error if it failed. Writing to the log must
//! never fail a run; callers ignore its errors.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::domain::{MaintenanceReport, TrimReport};
use crate::log_migrations::LOG_MIGRATIONS;

/// File name of the history database inside the event log directory
pub const EVENT_LOG_FILE: &str = "maintenance-log.duckdb";

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Current unix timestamp in milliseconds
fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unique ID: timestamp in the upper 48 bits, counter in the lower 16
fn generate_id() -> u64 {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    ((now_ms() as u64) << 16) | counter
}

fn detect_platform() -> &'static str {
    if cfg!(target_os = "linux") {
        "linux"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "unknown"
    }
}

/// A run outcome to be recorded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Self::default()
        }
    }

    /// A successful run
    pub fn completed(report: &MaintenanceReport) -> Self {
        Self {
            event: "maintenance_completed".to_string(),
            variant: Some(report.variant.as_str().to_string()),
            strategy: Some(report.strategy.as_str().to_string()),
            engine: Some(report.engine.as_str().to_string()),
            database_path: Some(report.database.display().to_string()),
            original_size: Some(report.original_size),
            final_size: Some(report.final_size),
            rows_deleted: None,
            error_message: None,
        }
    }

    /// A trim that deleted rows
    pub fn trimmed(report: &TrimReport) -> Self {
        Self {
            event: "trim_completed".to_string(),
            variant: Some(report.variant.as_str().to_string()),
            strategy: Some("trim".to_string()),
            engine: Some(report.engine.as_str().to_string()),
            database_path: Some(report.database.display().to_string()),
            rows_deleted: Some(report.affected),
            ..Self::default()
        }
    }

    /// A failed run
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new("maintenance_failed").with_error(message)
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn with_database(mut self, path: &Path) -> Self {
        self.database_path = Some(path.display().to_string());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A recorded run as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntry {
    pub id: u64,
    pub timestamp: i64,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub variant: Option<String>,
    pub strategy: Option<String>,
    pub engine: Option<String>,
    pub database_path: Option<String>,
    pub original_size: Option<u64>,
    pub final_size: Option<u64>,
    pub rows_deleted: Option<u64>,
    pub error_message: Option<String>,
}

const ENTRY_COLUMNS: &str = "id, timestamp, app_version, platform, event, variant, strategy, \
     engine, database_path, original_size, final_size, rows_deleted, error_message";

/// Run history backed by `maintenance-log.duckdb`
pub struct EventLog {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    app_version: String,
    platform: &'static str,
}

impl EventLog {
    /// Open or create the history database in `log_dir` and apply pending
    /// migrations
    pub fn new(log_dir: &Path, app_version: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create {}", log_dir.display()))?;
        let db_path = log_dir.join(EVENT_LOG_FILE);
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(&db_path, config)?;

        let log = Self {
            conn: Mutex::new(conn),
            db_path,
            app_version: app_version.into(),
            platform: detect_platform(),
        };
        log.run_migrations()?;

        Ok(log)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        let table_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM information_schema.tables WHERE table_name = 'sys_migrations'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !table_exists {
            if let Some((name, sql)) = LOG_MIGRATIONS.iter().find(|(n, _)| *n == "000_migrations.sql")
            {
                conn.execute_batch(sql)?;
                conn.execute("INSERT INTO sys_migrations (migration_name) VALUES (?)", [name])?;
            }
        }

        let mut stmt = conn.prepare("SELECT migration_name FROM sys_migrations")?;
        let applied: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        for (name, sql) in LOG_MIGRATIONS.iter() {
            if *name == "000_migrations.sql" || applied.iter().any(|a| a == name) {
                continue;
            }
            conn.execute_batch(sql)?;
            conn.execute("INSERT INTO sys_migrations (migration_name) VALUES (?)", [name])?;
        }

        Ok(())
    }

    /// Record a run
    pub fn log(&self, event: RunEvent) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        conn.execute(
            &format!(
                "INSERT INTO sys_runs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ENTRY_COLUMNS
            ),
            duckdb::params![
                generate_id(),
                now_ms(),
                &self.app_version,
                self.platform,
                &event.event,
                &event.variant,
                &event.strategy,
                &event.engine,
                &event.database_path,
                &event.original_size,
                &event.final_size,
                &event.rows_deleted,
                &event.error_message,
            ],
        )?;

        Ok(())
    }

    fn query_entries(&self, filter: &str, limit: usize) -> Result<Vec<RunEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_runs {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            ENTRY_COLUMNS, filter
        ))?;

        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(RunEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    app_version: row.get(2)?,
                    platform: row.get(3)?,
                    event: row.get(4)?,
                    variant: row.get(5)?,
                    strategy: row.get(6)?,
                    engine: row.get(7)?,
                    database_path: row.get(8)?,
                    original_size: row.get(9)?,
                    final_size: row.get(10)?,
                    rows_deleted: row.get(11)?,
                    error_message: row.get(12)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Most recent runs first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<RunEntry>> {
        self.query_entries("", limit)
    }

    /// Most recent failed runs first
    pub fn get_errors(&self, limit: usize) -> Result<Vec<RunEntry>> {
        self.query_entries("WHERE error_message IS NOT NULL", limit)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_runs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete entries older than the given unix timestamp (ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let deleted = conn.execute("DELETE FROM sys_runs WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }

    /// Delete entries older than `days` days
    pub fn prune(&self, days: u32) -> Result<u64> {
        self.delete_before(now_ms() - i64::from(days) * MS_PER_DAY)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
