//! Compact service - in-place compaction

use std::path::Path;

use crate::domain::result::{Error, Result};
use crate::ports::MaintenanceEngine;

/// Runs the engine's in-place compaction primitive
pub struct CompactService<'a> {
    engine: &'a dyn MaintenanceEngine,
}

impl<'a> CompactService<'a> {
    pub fn new(engine: &'a dyn MaintenanceEngine) -> Self {
        Self { engine }
    }

    /// Label of the command this service runs
    pub fn label(&self) -> &'static str {
        self.engine.compact_label()
    }

    /// Compact the database in place. Idempotent.
    pub fn compact(&self, db_path: &Path) -> Result<()> {
        self.engine
            .compact(db_path)
            .map_err(|e| Error::operation(self.label(), e))
    }
}
