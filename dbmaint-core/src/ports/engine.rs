//! Engine port - compaction, dump, restore and trim primitives

use std::path::Path;

use anyhow::Result;

use crate::domain::{EngineKind, RowCounts, Strategy};

/// Database engine primitives used by the maintenance strategies
///
/// Implementations assume exclusive access to the files they are given.
/// Nothing here takes a lock; callers that share a database with other
/// writers must coordinate externally (an advisory lock held by the
/// scheduler, for instance).
pub trait MaintenanceEngine: Send + Sync {
    /// Which engine this is
    fn kind(&self) -> EngineKind;

    /// Whether this engine implements the given strategy
    fn supports(&self, strategy: Strategy) -> bool;

    /// Label of the in-place compaction command (e.g. "VACUUM")
    fn compact_label(&self) -> &'static str;

    /// Reclaim free space in place without changing logical content
    fn compact(&self, db_path: &Path) -> Result<()>;

    /// Serialize the full logical content of `db_path` to `dump_path`
    fn dump(&self, db_path: &Path, dump_path: &Path) -> Result<()>;

    /// Create a brand-new database at `target` from a dump
    fn restore(&self, dump_path: &Path, target: &Path) -> Result<()>;

    /// Row count of every user table
    fn table_row_counts(&self, db_path: &Path) -> Result<RowCounts>;

    /// Oldest and newest `timestamp` in `table`, `None` when it is empty
    fn timestamp_bounds(&self, db_path: &Path, table: &str) -> Result<Option<(i64, i64)>>;

    /// Rows of `table` with `begin <= timestamp < end`
    fn count_between(&self, db_path: &Path, table: &str, begin: i64, end: i64) -> Result<u64>;

    /// Delete rows of `table` with `begin <= timestamp < end` in one
    /// transaction, returning how many went
    fn delete_between(&self, db_path: &Path, table: &str, begin: i64, end: i64) -> Result<u64>;
}
