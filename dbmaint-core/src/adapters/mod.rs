//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - rusqlite for SQLite databases (the countme raw and totals files)
//! - DuckDB for `.duckdb` files
//! - system commands (`id`, `rpm`) for identity and package lookups

pub mod duckdb;
pub mod sqlite;
pub mod system;

use crate::domain::EngineKind;
use crate::ports::MaintenanceEngine;

/// Engine adapter for the given kind
pub fn engine_for(kind: EngineKind) -> Box<dyn MaintenanceEngine> {
    match kind {
        EngineKind::Sqlite => Box::new(sqlite::SqliteEngine::new()),
        EngineKind::DuckDb => Box::new(duckdb::DuckDbEngine::new()),
    }
}
