//! Trim service - delete old rows from the raw table
//!
//! Planning only reads the database. Deletion is a separate call so the
//! caller can show what is about to go and give the operator a chance to
//! interrupt.

use std::path::Path;

use crate::domain::result::{Error, Result};
use crate::domain::{TrimSelection, TrimWindow};
use crate::ports::MaintenanceEngine;

/// What a trim would delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimPlan {
    pub window: TrimWindow,
    pub affected: u64,
}

pub struct TrimService<'a> {
    engine: &'a dyn MaintenanceEngine,
    table: &'a str,
}

impl<'a> TrimService<'a> {
    pub fn new(engine: &'a dyn MaintenanceEngine, table: &'a str) -> Self {
        Self { engine, table }
    }

    /// Work out the window and count the rows in it. `None` when the table
    /// holds no rows at all.
    pub fn plan(&self, db_path: &Path, selection: TrimSelection) -> Result<Option<TrimPlan>> {
        let bounds = self
            .engine
            .timestamp_bounds(db_path, self.table)
            .map_err(|e| Error::operation("read timestamp range", e))?;
        let Some((min_time, max_time)) = bounds else {
            return Ok(None);
        };

        let window = TrimWindow::plan(selection, min_time, max_time);
        let affected = if window.is_empty() {
            0
        } else {
            self.engine
                .count_between(db_path, self.table, window.begin, window.end)
                .map_err(|e| Error::operation("count rows to trim", e))?
        };

        Ok(Some(TrimPlan { window, affected }))
    }

    /// Delete the rows of a plan
    pub fn apply(&self, db_path: &Path, plan: &TrimPlan) -> Result<u64> {
        if plan.window.is_empty() {
            return Ok(0);
        }
        self.engine
            .delete_between(db_path, self.table, plan.window.begin, plan.window.end)
            .map_err(|e| Error::operation("delete rows", e))
    }
}
