//! Maintenance runner - argument resolution, preconditions, dispatch
//!
//! The pipeline is linear:
//! resolve variant -> validate strategy -> check identity -> check the
//! database exists -> check the engine implements the strategy -> run.
//! Nothing touches the filesystem before the identity check has passed.
//!
//! Trimming old rows is a separate operation with the same identity and
//! existence preconditions.
//!
//! The runner does not lock the database. Callers must make sure nothing
//! else writes to it for the duration of a run, e.g. by never scheduling a
//! run concurrently with the producer that fills it.

use std::path::{Path, PathBuf};

use crate::adapters;
use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Diagnostics, EngineKind, MaintenanceReport, RowCounts, Strategy, TrimReport, TrimSelection,
    Variant, RAW_TABLE,
};
use crate::ports::{IdentityProvider, MaintenanceEngine, PackageQuery};
use crate::services::compact::CompactService;
use crate::services::rebuild::{RebuildService, REBUILD_LABEL};
use crate::services::trim::{TrimPlan, TrimService};

/// Builds the engine adapter for a resolved engine kind
pub type EngineFactory = Box<dyn Fn(EngineKind) -> Box<dyn MaintenanceEngine> + Send + Sync>;

/// A run that passed every precondition and is ready to execute
pub struct PreparedRun {
    pub variant: Variant,
    pub strategy: Strategy,
    pub database: PathBuf,
    pub original_size: u64,
    pub diagnostics: Diagnostics,
    engine: Box<dyn MaintenanceEngine>,
}

impl PreparedRun {
    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Label of the command the strategy runs
    pub fn command_label(&self) -> &'static str {
        match self.strategy {
            Strategy::CompactInPlace => self.engine.compact_label(),
            Strategy::Rebuild => REBUILD_LABEL,
        }
    }
}

/// A trim that passed every precondition and has been planned
pub struct PreparedTrim {
    pub variant: Variant,
    pub selection: TrimSelection,
    pub database: PathBuf,
    pub diagnostics: Diagnostics,
    /// `None` when the table is empty
    pub plan: Option<TrimPlan>,
    engine: Box<dyn MaintenanceEngine>,
}

impl PreparedTrim {
    pub fn engine_kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Rows the trim would delete
    pub fn affected(&self) -> u64 {
        self.plan.map(|p| p.affected).unwrap_or(0)
    }

    /// Report for a trim that stops after planning
    pub fn dry_run_report(&self) -> TrimReport {
        self.report(false)
    }

    fn report(&self, deleted: bool) -> TrimReport {
        TrimReport {
            variant: self.variant,
            engine: self.engine_kind(),
            database: self.database.clone(),
            selection: self.selection,
            window: self.plan.map(|p| p.window),
            affected: self.affected(),
            deleted,
        }
    }
}

/// Runs one maintenance strategy against one database
pub struct MaintenanceRunner {
    config: Config,
    identity: Box<dyn IdentityProvider>,
    packages: Box<dyn PackageQuery>,
    engines: EngineFactory,
    verify: bool,
}

impl MaintenanceRunner {
    pub fn new(
        config: Config,
        identity: Box<dyn IdentityProvider>,
        packages: Box<dyn PackageQuery>,
    ) -> Self {
        Self {
            config,
            identity,
            packages,
            engines: Box::new(adapters::engine_for),
            verify: false,
        }
    }

    /// Replace the engine adapters
    pub fn with_engine_factory(mut self, engines: EngineFactory) -> Self {
        self.engines = engines;
        self
    }

    /// Compare per-table row counts before and after the run
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve arguments and check every precondition
    ///
    /// `variant_arg` and `strategy_arg` are the first and second positional
    /// arguments as given on the command line.
    pub fn prepare(
        &self,
        variant_arg: Option<&str>,
        strategy_arg: Option<&str>,
    ) -> Result<PreparedRun> {
        let variant = Variant::from_arg(variant_arg);
        let strategy = Strategy::from_arg(strategy_arg)?;

        let (database, engine) = self.locate(variant)?;
        if !engine.supports(strategy) {
            return Err(Error::InternalDispatch(format!(
                "{} engine has no {} implementation",
                engine.kind().as_str(),
                strategy.as_str()
            )));
        }

        let original_size = file_size(&database)?;
        let diagnostics = self.diagnostics();

        Ok(PreparedRun {
            variant,
            strategy,
            database,
            original_size,
            diagnostics,
            engine,
        })
    }

    /// Run the prepared strategy and measure the result
    pub fn execute(&self, run: &PreparedRun) -> Result<MaintenanceReport> {
        let engine = run.engine.as_ref();

        let counts_before = if self.verify {
            Some(row_counts(engine, &run.database)?)
        } else {
            None
        };

        match run.strategy {
            Strategy::CompactInPlace => CompactService::new(engine).compact(&run.database)?,
            Strategy::Rebuild => RebuildService::new(engine, &run.database).run()?,
        }

        let verified_counts = match counts_before {
            Some(before) => {
                let after = row_counts(engine, &run.database)?;
                if before != after {
                    return Err(Error::VerificationFailed(format!(
                        "row counts changed: before {:?}, after {:?}",
                        before, after
                    )));
                }
                Some(after)
            }
            None => None,
        };

        Ok(MaintenanceReport {
            variant: run.variant,
            strategy: run.strategy,
            engine: run.engine_kind(),
            database: run.database.clone(),
            original_size: run.original_size,
            final_size: file_size(&run.database)?,
            row_counts: verified_counts,
        })
    }

    /// `prepare` followed by `execute`
    pub fn run(
        &self,
        variant_arg: Option<&str>,
        strategy_arg: Option<&str>,
    ) -> Result<MaintenanceReport> {
        let prepared = self.prepare(variant_arg, strategy_arg)?;
        self.execute(&prepared)
    }

    /// Check preconditions and count what a trim of `variant_arg` would
    /// delete. Reads the database but never changes it.
    pub fn prepare_trim(
        &self,
        variant_arg: Option<&str>,
        selection: TrimSelection,
    ) -> Result<PreparedTrim> {
        let variant = Variant::from_arg(variant_arg);
        let (database, engine) = self.locate(variant)?;
        let plan = TrimService::new(engine.as_ref(), RAW_TABLE).plan(&database, selection)?;

        Ok(PreparedTrim {
            variant,
            selection,
            database,
            diagnostics: self.diagnostics(),
            plan,
            engine,
        })
    }

    /// Delete the rows counted by `prepare_trim`
    pub fn execute_trim(&self, trim: &PreparedTrim) -> Result<TrimReport> {
        let mut report = trim.report(true);
        if let Some(plan) = &trim.plan {
            report.affected =
                TrimService::new(trim.engine.as_ref(), RAW_TABLE).apply(&trim.database, plan)?;
        }
        Ok(report)
    }

    /// Identity, then existence, then the engine for the database
    ///
    /// A symlinked database is resolved to the file it points at, so a
    /// rebuild replaces that file and keeps the link.
    fn locate(&self, variant: Variant) -> Result<(PathBuf, Box<dyn MaintenanceEngine>)> {
        self.check_identity()?;

        let mut database = self.config.database_path(variant);
        if !database.is_file() {
            return Err(Error::not_found(database.display().to_string()));
        }
        if std::fs::symlink_metadata(&database)?.file_type().is_symlink() {
            database = std::fs::canonicalize(&database)?;
        }

        let engine = (self.engines)(self.config.engine.resolve(&database));
        Ok((database, engine))
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            package_name: self.config.package_name.clone(),
            package_version: self.packages.installed_version(&self.config.package_name),
            data_dir: self.config.data_dir.clone(),
        }
    }

    fn check_identity(&self) -> Result<()> {
        let user = self
            .identity
            .current_user()
            .map_err(|e| Error::permission(format!("cannot determine current user: {:#}", e)))?;
        if user != self.config.required_user {
            return Err(Error::permission(format!(
                "must be run as '{}', not '{}'",
                self.config.required_user, user
            )));
        }
        Ok(())
    }
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

fn row_counts(engine: &dyn MaintenanceEngine, path: &Path) -> Result<RowCounts> {
    engine
        .table_row_counts(path)
        .map_err(|e| Error::operation("count rows", e))
}
