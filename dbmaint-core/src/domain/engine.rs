use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::result::Error;

/// Database engine that owns a target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    DuckDb,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Sqlite => "sqlite",
            EngineKind::DuckDb => "duckdb",
        }
    }
}

/// Engine selection as written in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineSelection {
    /// Pick by file extension: `.duckdb` is DuckDB, anything else SQLite
    #[default]
    Auto,
    Sqlite,
    DuckDb,
}

impl EngineSelection {
    pub fn resolve(&self, path: &Path) -> EngineKind {
        match self {
            EngineSelection::Sqlite => EngineKind::Sqlite,
            EngineSelection::DuckDb => EngineKind::DuckDb,
            EngineSelection::Auto => match path.extension().and_then(|e| e.to_str()) {
                Some("duckdb") => EngineKind::DuckDb,
                _ => EngineKind::Sqlite,
            },
        }
    }
}

impl FromStr for EngineSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(EngineSelection::Auto),
            "sqlite" => Ok(EngineSelection::Sqlite),
            "duckdb" => Ok(EngineSelection::DuckDb),
            other => Err(Error::Config(format!(
                "unknown engine '{}' (expected auto, sqlite or duckdb)",
                other
            ))),
        }
    }
}
