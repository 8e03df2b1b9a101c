//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external collaborators. The runner
//! depends only on these traits, not on concrete implementations.

mod engine;
mod system;

pub use engine::MaintenanceEngine;
pub use system::{IdentityProvider, PackageQuery};
