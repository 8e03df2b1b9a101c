//! Configuration management
//!
//! Settings live in a JSON file (default `/etc/dbmaint/settings.json`):
//! ```json
//! {
//!   "dataDir": "/var/lib/countme",
//!   "requiredUser": "countme",
//!   "packageName": "mirrors-countme",
//!   "primaryDatabase": "raw.db",
//!   "alternateDatabase": "totals.db",
//!   "engine": "auto",
//!   "eventLogDir": "/var/log/dbmaint",
//!   "eventLogRetentionDays": 90
//! }
//! ```
//! Every key is optional. A missing file means all defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::domain::{EngineSelection, Variant};

/// Default settings file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dbmaint/settings.json";

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/countme")
}

fn default_required_user() -> String {
    "countme".to_string()
}

fn default_package_name() -> String {
    "mirrors-countme".to_string()
}

fn default_primary_database() -> String {
    "raw.db".to_string()
}

fn default_alternate_database() -> String {
    "totals.db".to_string()
}

fn default_retention_days() -> u32 {
    90
}

/// Raw settings file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_required_user")]
    pub required_user: String,
    #[serde(default = "default_package_name")]
    pub package_name: String,
    #[serde(default = "default_primary_database")]
    pub primary_database: String,
    #[serde(default = "default_alternate_database")]
    pub alternate_database: String,
    #[serde(default)]
    pub engine: EngineSelection,
    /// Directory for the run history database; no history when unset
    #[serde(default)]
    pub event_log_dir: Option<PathBuf>,
    #[serde(default = "default_retention_days")]
    pub event_log_retention_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            required_user: default_required_user(),
            package_name: default_package_name(),
            primary_database: default_primary_database(),
            alternate_database: default_alternate_database(),
            engine: EngineSelection::default(),
            event_log_dir: None,
            event_log_retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load settings from `path`, then apply environment overrides
    ///
    /// Overrides (mainly for tests and one-off runs):
    /// - `DBMAINT_DATA_DIR`
    /// - `DBMAINT_REQUIRED_USER`
    /// - `DBMAINT_ENGINE` (`auto`, `sqlite`, `duckdb`)
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load settings from `path` without environment overrides
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DBMAINT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(user) = lookup("DBMAINT_REQUIRED_USER") {
            self.required_user = user;
        }
        if let Some(engine) = lookup("DBMAINT_ENGINE") {
            self.engine = engine.parse()?;
        }
        Ok(())
    }

    /// File name configured for a variant
    pub fn database_file(&self, variant: Variant) -> &str {
        match variant {
            Variant::Primary => &self.primary_database,
            Variant::Alternate => &self.alternate_database,
        }
    }

    /// Path of the database a variant resolves to
    pub fn database_path(&self, variant: Variant) -> PathBuf {
        self.data_dir.join(self.database_file(variant))
    }
}
