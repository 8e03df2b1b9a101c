//! SQLite engine implementation
//!
//! The dump format is a plain SQL script in the shape produced by the
//! `sqlite3` shell's `.dump` command, so an operator can inspect or replay a
//! leftover dump by hand. Two differences: `user_version` is carried over,
//! and every `INSERT` fits on one line (text containing line breaks or NUL
//! is written as a hex cast).

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::domain::{EngineKind, RowCounts, Strategy};
use crate::ports::MaintenanceEngine;

/// How long a statement waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Restore executes the script in batches of roughly this many bytes
const RESTORE_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// A row of `sqlite_master` that has SQL text
struct SchemaObject {
    kind: String,
    name: String,
    sql: String,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a column value as a SQL literal that reads back with the same
/// storage class
fn sql_literal(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => {
            if f.is_nan() {
                // SQLite never stores NaN, it reads back as NULL
                "NULL".to_string()
            } else if f.is_infinite() {
                let literal = if f > 0.0 { "1e999" } else { "-1e999" };
                literal.to_string()
            } else {
                // Debug formatting always keeps a '.' or an exponent
                format!("{:?}", f)
            }
        }
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) if !s.contains(['\n', '\r', '\0']) => format!("'{}'", s.replace('\'', "''")),
            _ => format!("CAST(X'{}' AS TEXT)", hex::encode(bytes)),
        },
        ValueRef::Blob(bytes) => format!("X'{}'", hex::encode(bytes)),
    }
}

/// Token classes that matter for finding the end of a statement
#[derive(Clone, Copy)]
enum Token {
    Semi,
    Space,
    Other,
    Create,
    Temp,
    Trigger,
    End,
}

/// Statement-boundary state machine. Semicolons inside a `CREATE TRIGGER`
/// body only end the statement once they follow `END`.
///
/// States: 0 invalid, 1 start, 2 normal, 3 create, 4 trigger, 5 semi, 6 end.
/// Columns follow the order of `Token`.
const TRANSITIONS: [[u8; 7]; 7] = [
    [1, 0, 2, 3, 2, 2, 2],
    [1, 1, 2, 3, 2, 2, 2],
    [1, 2, 2, 2, 2, 2, 2],
    [1, 3, 2, 2, 3, 4, 2],
    [5, 4, 4, 4, 4, 4, 4],
    [5, 5, 4, 4, 4, 4, 6],
    [1, 6, 4, 4, 4, 4, 4],
];

fn is_id_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn keyword(word: &[u8]) -> Token {
    if word.eq_ignore_ascii_case(b"create") {
        Token::Create
    } else if word.eq_ignore_ascii_case(b"temp") || word.eq_ignore_ascii_case(b"temporary") {
        Token::Temp
    } else if word.eq_ignore_ascii_case(b"trigger") {
        Token::Trigger
    } else if word.eq_ignore_ascii_case(b"end") {
        Token::End
    } else {
        Token::Other
    }
}

/// Whether `sql` ends with a complete statement: the last semicolon is
/// outside quotes and comments, and closes a trigger body if one is open
fn is_complete_statement(sql: &str) -> bool {
    let bytes = sql.as_bytes();
    let mut state = 0u8;
    let mut i = 0;

    while i < bytes.len() {
        let token = match bytes[i] {
            b';' => {
                i += 1;
                Token::Semi
            }
            b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' => {
                i += 1;
                Token::Space
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                match sql[i + 2..].find("*/") {
                    Some(pos) => i += 2 + pos + 2,
                    None => return false,
                }
                Token::Space
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                match sql[i..].find('\n') {
                    Some(pos) => i += pos + 1,
                    None => return state == 1,
                }
                Token::Space
            }
            quote @ (b'\'' | b'"' | b'`' | b'[') => {
                let close = if quote == b'[' { b']' } else { quote };
                match bytes[i + 1..].iter().position(|&b| b == close) {
                    // A doubled quote is two adjacent quoted runs
                    Some(pos) => i += pos + 2,
                    None => return false,
                }
                Token::Other
            }
            b if is_id_char(b) => {
                let start = i;
                while i < bytes.len() && is_id_char(bytes[i]) {
                    i += 1;
                }
                keyword(&bytes[start..i])
            }
            _ => {
                i += 1;
                Token::Other
            }
        };
        state = TRANSITIONS[state as usize][token as usize];
    }

    state == 1
}

/// SQLite engine
#[derive(Debug, Default)]
pub struct SqliteEngine;

impl SqliteEngine {
    pub fn new() -> Self {
        Self
    }

    fn open(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn open_read_only(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open {} read-only", db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn schema_objects(conn: &Connection) -> Result<Vec<SchemaObject>> {
        let mut stmt = conn.prepare(
            "SELECT type, name, sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid",
        )?;
        let objects = stmt
            .query_map([], |row| {
                Ok(SchemaObject {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(objects)
    }

    /// Columns that accept inserts (generated columns are skipped)
    fn insertable_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_xinfo({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let hidden: i64 = row.get("hidden")?;
                Ok((name, hidden))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, hidden)| *hidden == 0)
            .map(|(name, _)| name)
            .collect();
        Ok(columns)
    }

    fn write_rows<W: Write>(conn: &Connection, table: &str, out: &mut W) -> Result<()> {
        let columns = Self::insertable_columns(conn, table)?;
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(",");

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}",
            column_list,
            quote_ident(table)
        ))?;
        let mut rows = stmt.query([])?;
        let mut values = Vec::with_capacity(columns.len());

        while let Some(row) = rows.next()? {
            values.clear();
            for i in 0..columns.len() {
                values.push(sql_literal(row.get_ref(i)?));
            }
            writeln!(
                out,
                "INSERT INTO {}({}) VALUES({});",
                quote_ident(table),
                column_list,
                values.join(",")
            )?;
        }

        Ok(())
    }

    /// Write the full logical content of `conn` as a SQL script
    pub fn write_dump<W: Write>(conn: &Connection, out: &mut W) -> Result<()> {
        let objects = Self::schema_objects(conn)?;
        let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        writeln!(out, "PRAGMA foreign_keys=OFF;")?;
        writeln!(out, "BEGIN TRANSACTION;")?;
        if user_version != 0 {
            writeln!(out, "PRAGMA user_version={};", user_version)?;
        }

        let mut has_sequence = false;
        for object in objects.iter().filter(|o| o.kind == "table") {
            if object.name == "sqlite_sequence" {
                has_sequence = true;
                continue;
            }
            // Statistics tables are rebuilt by ANALYZE
            if object.name.starts_with("sqlite_") {
                continue;
            }
            if object.sql.to_uppercase().starts_with("CREATE VIRTUAL TABLE") {
                bail!("Virtual table '{}' cannot be dumped", object.name);
            }
            writeln!(out, "{};", object.sql)?;
            Self::write_rows(conn, &object.name, out)?;
        }

        // Created implicitly by the AUTOINCREMENT tables above
        if has_sequence {
            writeln!(out, "DELETE FROM sqlite_sequence;")?;
            Self::write_rows(conn, "sqlite_sequence", out)?;
        }

        for object in objects.iter().filter(|o| o.kind != "table") {
            writeln!(out, "{};", object.sql)?;
        }

        writeln!(out, "COMMIT;")?;
        Ok(())
    }

    /// Execute a SQL script against `conn`, streaming it statement by
    /// statement instead of loading it whole
    pub fn execute_script<R: BufRead>(conn: &Connection, script: R) -> Result<()> {
        let mut statement = String::new();
        let mut batch = String::new();

        for line in script.lines() {
            let line = line?;
            statement.push_str(&line);
            statement.push('\n');

            if is_complete_statement(&statement) {
                batch.push_str(&statement);
                statement.clear();
                if batch.len() >= RESTORE_BATCH_BYTES {
                    conn.execute_batch(&batch)?;
                    batch.clear();
                }
            }
        }

        ensure!(
            statement.trim().is_empty(),
            "Dump ends with an incomplete statement"
        );
        if !batch.is_empty() {
            conn.execute_batch(&batch)?;
        }
        Ok(())
    }
}

impl MaintenanceEngine for SqliteEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn supports(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::CompactInPlace | Strategy::Rebuild => true,
        }
    }

    fn compact_label(&self) -> &'static str {
        "VACUUM"
    }

    fn compact(&self, db_path: &Path) -> Result<()> {
        let conn = Self::open(db_path)?;
        conn.execute_batch("VACUUM").context("VACUUM failed")?;
        Ok(())
    }

    fn dump(&self, db_path: &Path, dump_path: &Path) -> Result<()> {
        // Read-write so that closing the last connection checkpoints and
        // removes a WAL file, which must not outlive the rename
        let conn = Self::open(db_path)?;
        let file = File::create(dump_path)
            .with_context(|| format!("Failed to create {}", dump_path.display()))?;
        let mut out = BufWriter::new(file);

        // One read transaction so the dump is a consistent snapshot
        conn.execute_batch("BEGIN")?;
        Self::write_dump(&conn, &mut out)?;
        conn.execute_batch("COMMIT")?;

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn restore(&self, dump_path: &Path, target: &Path) -> Result<()> {
        ensure!(
            !target.exists(),
            "Refusing to restore into existing file {}",
            target.display()
        );

        let script = BufReader::new(
            File::open(dump_path)
                .with_context(|| format!("Failed to open {}", dump_path.display()))?,
        );
        let conn = Self::open(target)?;
        Self::execute_script(&conn, script).context("Failed to execute dump script")?;
        conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    fn table_row_counts(&self, db_path: &Path) -> Result<RowCounts> {
        let conn = Self::open_read_only(db_path)?;
        let mut counts = RowCounts::new();

        for object in Self::schema_objects(&conn)? {
            if object.kind != "table" || object.name.starts_with("sqlite_") {
                continue;
            }
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quote_ident(&object.name)),
                [],
                |row| row.get(0),
            )?;
            counts.insert(object.name, count as u64);
        }

        Ok(counts)
    }
    fn timestamp_bounds(&self, db_path: &Path, table: &str) -> Result<Option<(i64, i64)>> {
        let conn = Self::open_read_only(db_path)?;
        let (min, max): (Option<i64>, Option<i64>) = conn.query_row(
            &format!(
                "SELECT MIN(timestamp), MAX(timestamp) FROM {}",
                quote_ident(table)
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(min.zip(max))
    }

    fn count_between(&self, db_path: &Path, table: &str, begin: i64, end: i64) -> Result<u64> {
        let conn = Self::open_read_only(db_path)?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE timestamp >= ?1 AND timestamp < ?2",
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
                "DELETE FROM {} WHERE timestamp >= ?1 AND timestamp < ?2",
                quote_ident(table)
            ),
            [begin, end],
        )?;
        tx.commit()?;
        Ok(deleted as u64)
    }
}
