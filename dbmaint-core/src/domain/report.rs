use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::{EngineKind, Strategy, Variant};

/// Per-table row counts, keyed by table name
pub type RowCounts = BTreeMap<String, u64>;

/// Environment facts printed before a run
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub package_name: String,
    /// Installed version, `None` when the package is not installed
    pub package_version: Option<String>,
    pub data_dir: PathBuf,
}

impl Diagnostics {
    /// One-line summary, e.g. `mirrors-countme 0.3.1-1 | data dir: /var/lib/countme`
    pub fn summary(&self) -> String {
        let version = self.package_version.as_deref().unwrap_or("not installed");
        format!(
            "{} {} | data dir: {}",
            self.package_name,
            version,
            self.data_dir.display()
        )
    }
}

/// Outcome of a finished maintenance run
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub variant: Variant,
    pub strategy: Strategy,
    pub engine: EngineKind,
    pub database: PathBuf,
    pub original_size: u64,
    pub final_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_counts: Option<RowCounts>,
}

impl MaintenanceReport {
    pub fn saved_bytes(&self) -> u64 {
        self.original_size.saturating_sub(self.final_size)
    }

    pub fn saved_percent(&self) -> f64 {
        if self.original_size > 0 {
            (self.saved_bytes() as f64 / self.original_size as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(original_size: u64, final_size: u64) -> MaintenanceReport {
        MaintenanceReport {
            variant: Variant::Primary,
            strategy: Strategy::CompactInPlace,
            engine: EngineKind::Sqlite,
            database: PathBuf::from("raw.db"),
            original_size,
            final_size,
            row_counts: None,
        }
    }

    #[test]
    fn test_saved() {
        let r = report(4096, 1024);
        assert_eq!(r.saved_bytes(), 3072);
        assert!((r.saved_percent() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_saved_never_negative() {
        let r = report(1024, 2048);
        assert_eq!(r.saved_bytes(), 0);
        assert_eq!(report(0, 0).saved_percent(), 0.0);
    }

    #[test]
    fn test_diagnostics_summary() {
        let d = Diagnostics {
            package_name: "mirrors-countme".into(),
            package_version: None,
            data_dir: PathBuf::from("/var/lib/countme"),
        };
        assert_eq!(
            d.summary(),
            "mirrors-countme not installed | data dir: /var/lib/countme"
        );
    }
}
