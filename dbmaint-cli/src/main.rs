//! dbmaint - compact the countme statistics databases

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

mod commands;
mod output;

use commands::{history, maintain, trim};
use dbmaint_core::config::{Config, DEFAULT_CONFIG_PATH};
use dbmaint_core::domain::WARN_SECONDS;
use dbmaint_core::{MaintenanceRunner, Strategy, TrimSelection};

/// Exit code for failures outside the core error taxonomy
const FALLBACK_EXIT_CODE: u8 = 3;

/// Compact a countme database in place, or rebuild it through a dump.
///
/// Must run as the service user, with nothing else writing to the database.
#[derive(Parser)]
#[command(name = "dbmaint", version, about, long_about = None)]
struct Cli {
    /// Database variant: `totals` selects the totals database, anything else the raw one
    variant: Option<String>,

    /// Strategy: `dump`, `Dump` or `DUMP` rebuilds through a dump; empty compacts in place
    strategy: Option<String>,

    /// Settings file
    #[arg(long, env = "DBMAINT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Compare per-table row counts before and after
    #[arg(long)]
    verify: bool,

    /// Show the last N runs from the event log instead of running maintenance
    #[arg(long, value_name = "N")]
    history: Option<usize>,

    /// With --history, show only failed runs
    #[arg(long, requires = "history")]
    errors: bool,

    /// Delete old rows from countme_raw instead of compacting (dry run unless --read-write)
    #[arg(long, conflicts_with_all = ["strategy", "verify", "history"])]
    trim: bool,

    /// With --trim, keep the newest N weeks (plus one week of margin)
    #[arg(
        long,
        value_name = "WEEKS",
        requires = "trim",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    keep: Option<u32>,

    /// With --trim, delete only the oldest week
    #[arg(long, requires = "trim", conflicts_with = "keep")]
    oldest_week: bool,

    /// With --trim, actually delete the rows
    #[arg(long, requires = "trim")]
    read_write: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<dbmaint_core::Error>()
        .map(|e| e.exit_code())
        .unwrap_or(FALLBACK_EXIT_CODE)
}

fn run(cli: Cli) -> Result<()> {
    run_with(
        cli,
        MaintenanceRunner::from_system,
        Duration::from_secs(WARN_SECONDS),
    )
}

fn run_with(
    cli: Cli,
    runner_for: impl FnOnce(Config) -> MaintenanceRunner,
    trim_warning: Duration,
) -> Result<()> {
    if let Some(limit) = cli.history {
        let config = commands::load_config(&cli.config)?;
        return history::run(&config, limit, cli.errors, cli.json);
    }

    if cli.trim {
        let selection = match (cli.oldest_week, cli.keep) {
            (true, _) => TrimSelection::OldestWeek,
            (false, Some(weeks)) => TrimSelection::keep_weeks(weeks)?,
            (false, None) => TrimSelection::default(),
        };
        let runner = runner_for(commands::load_config(&cli.config)?);
        return trim::run(
            &runner,
            cli.variant.as_deref(),
            selection,
            cli.read_write,
            trim_warning,
            cli.json,
        );
    }

    // A bad strategy token is reported before the settings file is read
    Strategy::from_arg(cli.strategy.as_deref())?;

    let runner = runner_for(commands::load_config(&cli.config)?).with_verification(cli.verify);
    maintain::run(
        &runner,
        cli.variant.as_deref(),
        cli.strategy.as_deref(),
        cli.json,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmaint_core::adapters::system::{StaticIdentity, StaticPackageQuery};
    use dbmaint_core::EventLog;
    use rusqlite::Connection;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const SERVICE_USER: &str = "countme";
    const DAY: i64 = 86_400;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                dir: tempdir().unwrap(),
            };
            fs::create_dir(fixture.data_dir()).unwrap();
            let settings = serde_json::json!({
                "dataDir": fixture.data_dir(),
                "eventLogDir": fixture.log_dir(),
            });
            fs::write(fixture.config_path(), settings.to_string()).unwrap();
            fixture
        }

        fn data_dir(&self) -> PathBuf {
            self.dir.path().join("data")
        }

        fn log_dir(&self) -> PathBuf {
            self.dir.path().join("log")
        }

        fn config_path(&self) -> PathBuf {
            self.dir.path().join("settings.json")
        }

        fn raw_db(&self) -> PathBuf {
            self.data_dir().join("raw.db")
        }

        /// Run the CLI with `args` as `user`, returning the exit code
        fn run_as(&self, user: &str, args: &[&str]) -> u8 {
            let config = self.config_path();
            let mut argv = vec!["dbmaint", "--config", config.to_str().unwrap()];
            argv.extend_from_slice(args);
            let cli = Cli::parse_from(argv);

            let user = user.to_string();
            let result = run_with(
                cli,
                |config| {
                    MaintenanceRunner::new(
                        config,
                        Box::new(StaticIdentity::new(user)),
                        Box::new(StaticPackageQuery(Some("0.3.1-1".into()))),
                    )
                },
                Duration::ZERO,
            );
            match result {
                Ok(()) => 0,
                Err(e) => exit_code(&e),
            }
        }

        fn run(&self, args: &[&str]) -> u8 {
            self.run_as(SERVICE_USER, args)
        }

        fn event_log(&self) -> EventLog {
            EventLog::new(&self.log_dir(), "test").unwrap()
        }
    }

    /// Raw table with one row per day for `days` days
    fn create_raw_db(path: &Path, days: i64) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE countme_raw (timestamp INTEGER NOT NULL, host TEXT NOT NULL)",
        )
        .unwrap();
        // Monday 2021-01-04
        let start = 1_609_718_400;
        for day in 0..days {
            conn.execute(
                "INSERT INTO countme_raw VALUES (?1, 'mirror.example.org')",
                [start + day * DAY + 3_600],
            )
            .unwrap();
        }
    }

    fn raw_rows(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM countme_raw", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_unknown_strategy_beats_broken_settings() {
        let fixture = Fixture::new();
        fs::write(fixture.config_path(), "{ not json").unwrap();

        assert_eq!(fixture.run(&["raw", "bogus"]), 1);
        // The same settings file is a configuration error once the token is valid
        assert_eq!(fixture.run(&["raw", "dump"]), 3);
    }

    #[test]
    fn test_unknown_strategy_touches_nothing() {
        let fixture = Fixture::new();
        create_raw_db(&fixture.raw_db(), 3);

        assert_eq!(fixture.run(&["raw", "vacuum"]), 1);
        assert!(!fixture.log_dir().exists());
    }

    #[test]
    fn test_wrong_identity_writes_no_log() {
        let fixture = Fixture::new();
        create_raw_db(&fixture.raw_db(), 3);

        assert_eq!(fixture.run_as("root", &[]), 1);
        assert_eq!(fixture.run_as("root", &["--trim", "--read-write"]), 1);
        assert!(!fixture.log_dir().exists());
        assert_eq!(raw_rows(&fixture.raw_db()), 3);
    }

    #[test]
    fn test_missing_database_exits_2() {
        let fixture = Fixture::new();
        assert_eq!(fixture.run(&["totals"]), 2);
        assert!(!fixture.data_dir().join("totals.db.dump").exists());
    }

    #[test]
    fn test_success_logs_one_completed_run() {
        let fixture = Fixture::new();
        create_raw_db(&fixture.raw_db(), 10);

        assert_eq!(fixture.run(&["raw", "DUMP", "--verify"]), 0);

        let entries = fixture.event_log().get_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "maintenance_completed");
        assert_eq!(entries[0].strategy.as_deref(), Some("rebuild"));
        assert_eq!(raw_rows(&fixture.raw_db()), 10);
    }

    #[test]
    fn test_failed_run_shows_in_error_history() {
        let fixture = Fixture::new();
        fs::write(fixture.raw_db(), vec![0x42u8; 4096]).unwrap();

        assert_eq!(fixture.run(&[]), 3);
        assert_eq!(fixture.run(&["--history", "5", "--errors"]), 0);
        assert_eq!(fixture.run(&["--history", "5", "--json"]), 0);

        let errors = fixture.event_log().get_errors(5).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "maintenance_failed");
        assert!(errors[0].error_message.as_deref().unwrap().contains("VACUUM"));
    }

    #[test]
    fn test_history_without_event_log_uses_fallback_code() {
        let fixture = Fixture::new();
        fs::write(fixture.config_path(), "{}").unwrap();

        assert_eq!(fixture.run(&["--history", "5"]), FALLBACK_EXIT_CODE);
    }

    #[test]
    fn test_trim_dry_run_deletes_nothing() {
        let fixture = Fixture::new();
        create_raw_db(&fixture.raw_db(), 28);

        assert_eq!(fixture.run(&["--trim", "--keep", "1"]), 0);
        assert_eq!(fixture.run(&["--trim", "--oldest-week", "--json"]), 0);

        assert_eq!(raw_rows(&fixture.raw_db()), 28);
        assert!(!fixture.log_dir().exists());
    }

    #[test]
    fn test_trim_read_write_deletes_oldest_week() {
        let fixture = Fixture::new();
        create_raw_db(&fixture.raw_db(), 28);

        assert_eq!(fixture.run(&["--trim", "--oldest-week", "--read-write"]), 0);

        assert_eq!(raw_rows(&fixture.raw_db()), 21);
        let entries = fixture.event_log().get_recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "trim_completed");
        assert_eq!(entries[0].rows_deleted, Some(7));
    }

    #[test]
    fn test_trim_flags() {
        assert!(Cli::try_parse_from(["dbmaint", "--trim", "--keep", "0"]).is_err());
        assert!(Cli::try_parse_from(["dbmaint", "--keep", "3"]).is_err());
        assert!(Cli::try_parse_from(["dbmaint", "--trim", "--keep", "3", "--oldest-week"]).is_err());
        assert!(Cli::try_parse_from(["dbmaint", "raw", "dump", "--trim"]).is_err());

        let cli = Cli::try_parse_from(["dbmaint", "--trim", "--read-write"]).unwrap();
        assert!(cli.trim && cli.read_write && cli.keep.is_none());
    }

    #[test]
    fn test_exit_code_mapping() {
        let core: anyhow::Error = dbmaint_core::Error::not_found("raw.db").into();
        assert_eq!(exit_code(&core), 2);
        let interrupted: anyhow::Error = dbmaint_core::Error::Interrupted.into();
        assert_eq!(exit_code(&interrupted), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("something else")), FALLBACK_EXIT_CODE);
    }
}
