//! Service layer - maintenance orchestration
//!
//! The runner checks preconditions and dispatches to one of the strategy
//! services or to the trim service; the event log records the outcome.

mod compact;
pub mod logging;
pub mod maintenance;
pub mod rebuild;
pub mod trim;

pub use compact::CompactService;
pub use logging::{EventLog, RunEntry, RunEvent};
pub use maintenance::{EngineFactory, MaintenanceRunner, PreparedRun, PreparedTrim};
pub use rebuild::{RebuildArtifacts, RebuildService};
pub use trim::{TrimPlan, TrimService};
