//! Core domain types
//!
//! Plain data and parsing rules - no I/O.

mod engine;
mod report;
pub mod result;
mod strategy;
mod trim;
mod variant;

pub use engine::{EngineKind, EngineSelection};
pub use report::{Diagnostics, MaintenanceReport, RowCounts};
pub use strategy::{Strategy, STRATEGY_ALIASES};
pub use trim::{
    format_day, next_week, TrimReport, TrimSelection, TrimWindow, DEFAULT_KEEP_WEEKS, RAW_TABLE,
    WARN_SECONDS,
};
pub use variant::{Variant, ALTERNATE_TOKEN};
