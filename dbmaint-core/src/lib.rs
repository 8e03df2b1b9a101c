//! dbmaint core - compaction of file-backed statistics databases
//!
//! Laid out as a small hexagonal core:
//!
//! - **domain**: variants, strategies, reports and the error taxonomy
//! - **ports**: traits for the engine and for system lookups
//! - **services**: the maintenance runner, strategy services, event log
//! - **adapters**: SQLite, DuckDB and system-command implementations

pub mod adapters;
pub mod config;
pub mod domain;
mod log_migrations;
pub mod ports;
pub mod services;

use adapters::system::{RpmPackageQuery, SystemIdentity};
use config::Config;

pub use domain::result::{Error, Result};
pub use domain::{
    Diagnostics, EngineKind, MaintenanceReport, Strategy, TrimReport, TrimSelection, Variant,
};
pub use services::{
    EventLog, MaintenanceRunner, PreparedRun, PreparedTrim, RunEntry, RunEvent,
};

impl MaintenanceRunner {
    /// Runner wired to the real system: `id` for the identity check and
    /// `rpm` for the package version
    pub fn from_system(config: Config) -> Self {
        Self::new(config, Box::new(SystemIdentity), Box::new(RpmPackageQuery))
    }
}
