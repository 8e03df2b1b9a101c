//! DuckDB engine implementation

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use duckdb::Connection;

use crate::domain::{EngineKind, RowCounts, Strategy};
use crate::ports::MaintenanceEngine;

/// Maximum number of attempts when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
        // Another process holds the DuckDB file lock
        || lower.contains("could not set lock")
        || lower.contains("conflicting lock")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a path as a SQL string literal
fn sql_path(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

/// DuckDB engine
///
/// `VACUUM` does not reclaim space in DuckDB, so in-place compaction is a
/// forced checkpoint, and the rebuild goes through `EXPORT DATABASE` /
/// `IMPORT DATABASE`.
#[derive(Debug, Default)]
pub struct DuckDbEngine;

impl DuckDbEngine {
    pub fn new() -> Self {
        Self
    }

    /// Open a connection, retrying with exponential backoff while the file
    /// is locked by another process
    fn open(db_path: &Path) -> Result<Connection> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[dbmaint] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; parquet is linked in statically
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;
        Ok(conn)
    }
}

impl MaintenanceEngine for DuckDbEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::DuckDb
    }

    fn supports(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::CompactInPlace | Strategy::Rebuild => true,
        }
    }

    fn compact_label(&self) -> &'static str {
        "FORCE CHECKPOINT"
    }

    fn compact(&self, db_path: &Path) -> Result<()> {
        let conn = Self::open(db_path)?;
        conn.execute_batch("FORCE CHECKPOINT")
            .context("Failed to checkpoint database")?;
        Ok(())
    }

    fn dump(&self, db_path: &Path, dump_path: &Path) -> Result<()> {
        let conn = Self::open(db_path)?;
        conn.execute_batch(&format!(
            "EXPORT DATABASE {} (FORMAT PARQUET)",
            sql_path(dump_path)
        ))
        .context("Failed to export database")?;
        Ok(())
    }

    fn restore(&self, dump_path: &Path, target: &Path) -> Result<()> {
        let conn = Self::open(target).context("Failed to create rebuilt database")?;
        conn.execute_batch(&format!("IMPORT DATABASE {}", sql_path(dump_path)))
            .context("Failed to import database")?;
        conn.execute_batch("CHECKPOINT")?;
        Ok(())
    }

    fn table_row_counts(&self, db_path: &Path) -> Result<RowCounts> {
        let conn = Self::open(db_path)?;

        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = 'main' AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let mut counts = RowCounts::new();
        for table in tables {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&table)),
                [],
                |row| row.get(0),
            )?;
            counts.insert(table, count as u64);
        }

        Ok(counts)
    }
    fn timestamp_bounds(&self, db_path: &Path, table: &str) -> Result<Option<(i64, i64)>> {
        let conn = Self::open(db_path)?;
        let (min, max): (Option<i64>, Option<i64>) = conn.query_row(
            &format!(
                "SELECT MIN(timestamp)::BIGINT, MAX(timestamp)::BIGINT FROM {}",
                quote_ident(table)
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }

    fn count_between(&self, db_path: &Path, table: &str, begin: i64, end: i64) -> Result<u64> {
        let conn = Self::open(db_path)?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE timestamp >= ? AND timestamp < ?",
                quote_ident(table)
            ),
            [begin, end],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete_between(&self, db_path: &Path, table: &str, begin: i64, end: i64) -> Result<u64> {
        let mut conn = Self::open(db_path)?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE timestamp >= ? AND timestamp < ?",
                quote_ident(table)
            ),
            [begin, end],
        )?;
        tx.commit()?;
        Ok(deleted as u64)
    }
}
