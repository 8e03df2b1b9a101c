//! Integration tests for the maintenance runner
//!
//! These run the full pipeline against real SQLite and DuckDB files in a
//! scratch directory. Identity and package lookups are stubbed.
//!
//! Run with: cargo test --test maintenance_tests -- --nocapture

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;

use dbmaint_core::adapters::sqlite::SqliteEngine;
use dbmaint_core::adapters::system::{StaticIdentity, StaticPackageQuery};
use dbmaint_core::config::Config;
use dbmaint_core::domain::EngineSelection;
use dbmaint_core::services::RebuildArtifacts;
use dbmaint_core::{EngineKind, Error, MaintenanceRunner, Strategy, TrimSelection, Variant};

// ============================================================================
// Test Helpers
// ============================================================================

const SERVICE_USER: &str = "countme";

fn runner_as(dir: &TempDir, user: &str) -> MaintenanceRunner {
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    MaintenanceRunner::new(
        config,
        Box::new(StaticIdentity::new(user)),
        Box::new(StaticPackageQuery(Some("0.3.1-1".into()))),
    )
}

fn runner(dir: &TempDir) -> MaintenanceRunner {
    runner_as(dir, SERVICE_USER)
}

/// Create a SQLite database with some free pages left behind by deletes
fn create_sqlite_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE countme_raw (
            timestamp INTEGER NOT NULL,
            host TEXT NOT NULL,
            os_name TEXT,
            repo_arch TEXT,
            sys_age INTEGER
        );
        CREATE INDEX idx_countme_raw_timestamp ON countme_raw (timestamp);
        CREATE TABLE countme_totals (
            week_start INTEGER,
            hits INTEGER,
            os_name TEXT
        );
        WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 3000)
        INSERT INTO countme_raw
            SELECT 1600000000 + i * 60, 'host-' || (i % 97), 'Fedora Linux',
                   'updates-released-f' || (30 + i % 10), i % 4
            FROM n;
        INSERT INTO countme_totals VALUES (1599955200, 4711, 'Fedora Linux'), (1600560000, 42, NULL);
        DELETE FROM countme_raw WHERE (timestamp / 60) % 3 = 0;
        "#,
    )
    .unwrap();
}

/// Full logical content of a SQLite database as a SQL script
fn logical_content(path: &Path) -> String {
    let conn = Connection::open(path).unwrap();
    let mut out = Vec::new();
    SqliteEngine::write_dump(&conn, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

/// Every file in a directory with its bytes
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .map(|p| {
            let bytes = fs::read(&p).unwrap_or_default();
            (p, bytes)
        })
        .collect()
}

fn size(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

// ============================================================================
// Compact In Place
// ============================================================================

#[test]
fn test_default_run_compacts_primary_in_place() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let before_content = logical_content(&db);
    let before_size = size(&db);

    let runner = runner(&dir);
    let prepared = runner.prepare(None, None).unwrap();
    assert_eq!(prepared.variant, Variant::Primary);
    assert_eq!(prepared.strategy, Strategy::CompactInPlace);
    assert_eq!(prepared.engine_kind(), EngineKind::Sqlite);
    assert_eq!(prepared.command_label(), "VACUUM");
    assert_eq!(prepared.original_size, before_size);

    let report = runner.execute(&prepared).unwrap();
    assert_eq!(report.original_size, before_size);
    assert!(report.final_size <= report.original_size);
    assert_eq!(report.final_size, size(&db));
    assert_eq!(logical_content(&db), before_content);
}

#[test]
fn test_compact_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let content = logical_content(&db);

    let runner = runner(&dir);
    let first = runner.run(None, Some("")).unwrap();
    let second = runner.run(None, Some("")).unwrap();

    assert_eq!(second.original_size, first.final_size);
    assert!(second.final_size <= second.original_size);
    assert_eq!(logical_content(&db), content);
}

// ============================================================================
// Rebuild Via Dump And Restore
// ============================================================================

#[test]
fn test_rebuild_alternate_with_every_alias() {
    for alias in ["dump", "Dump", "DUMP"] {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("totals.db");
        create_sqlite_db(&db);
        let before = logical_content(&db);

        let report = runner(&dir).run(Some("totals"), Some(alias)).unwrap();

        assert_eq!(report.variant, Variant::Alternate);
        assert_eq!(report.strategy, Strategy::Rebuild);
        assert_eq!(report.database, db);
        assert_eq!(logical_content(&db), before, "content changed for alias {}", alias);

        let artifacts = RebuildArtifacts::for_target(&db);
        assert!(!artifacts.dump.exists());
        assert!(!artifacts.rebuilt.exists());
        // The primary database was never involved
        assert!(!dir.path().join("raw.db").exists());
    }
}

#[test]
fn test_rebuild_clears_stale_artifacts_from_failed_run() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let before = logical_content(&db);

    let artifacts = RebuildArtifacts::for_target(&db);
    fs::write(&artifacts.dump, "this is not SQL").unwrap();
    fs::write(&artifacts.rebuilt, "half-written database").unwrap();

    runner(&dir).run(None, Some("dump")).unwrap();

    assert_eq!(logical_content(&db), before);
    assert!(!artifacts.dump.exists());
    assert!(!artifacts.rebuilt.exists());
}

#[test]
fn test_rebuild_reclaims_space() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE blobs (v BLOB);
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 400)
             INSERT INTO blobs SELECT randomblob(4096) FROM n;
             DELETE FROM blobs WHERE rowid > 20;",
        )
        .unwrap();
    }

    let report = runner(&dir).run(None, Some("dump")).unwrap();
    assert!(report.final_size < report.original_size);
    assert!(report.saved_bytes() > 0);
}

#[test]
fn test_rebuild_duckdb_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("totals.duckdb");
    {
        let conn = duckdb::Connection::open(&db).unwrap();
        conn.execute_batch(
            "CREATE TABLE totals (week_start BIGINT, hits BIGINT, repo VARCHAR);
             INSERT INTO totals SELECT i * 604800, i * 3, 'fedora' FROM range(500) t(i);",
        )
        .unwrap();
    }

    let config = Config {
        data_dir: dir.path().to_path_buf(),
        alternate_database: "totals.duckdb".to_string(),
        ..Config::default()
    };
    let runner = MaintenanceRunner::new(
        config,
        Box::new(StaticIdentity::new(SERVICE_USER)),
        Box::new(StaticPackageQuery::default()),
    )
    .with_verification(true);

    let report = runner.run(Some("totals"), Some("dump")).unwrap();
    assert_eq!(report.engine, EngineKind::DuckDb);
    assert_eq!(report.row_counts.unwrap().get("totals"), Some(&500));
    assert!(!RebuildArtifacts::for_target(&db).dump.exists());

    let conn = duckdb::Connection::open(&db).unwrap();
    let hits: i64 = conn
        .query_row("SELECT CAST(SUM(hits) AS BIGINT) FROM totals", [], |r| r.get(0))
        .unwrap();
    assert_eq!(hits, (0..500).map(|i| i * 3).sum::<i64>());
}

#[test]
fn test_engine_selection_from_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.db"), b"placeholder").unwrap();

    let config = Config {
        data_dir: dir.path().to_path_buf(),
        engine: EngineSelection::DuckDb,
        ..Config::default()
    };
    let runner = MaintenanceRunner::new(
        config,
        Box::new(StaticIdentity::new(SERVICE_USER)),
        Box::new(StaticPackageQuery::default()),
    );

    let prepared = runner.prepare(None, None).unwrap();
    assert_eq!(prepared.engine_kind(), EngineKind::DuckDb);
    assert_eq!(prepared.command_label(), "FORCE CHECKPOINT");
    assert!(prepared.diagnostics.package_version.is_none());
}

// ============================================================================
// Crash Safety
// ============================================================================

/// Stop the rebuild after each step in turn; the target must exist at every
/// point and hold either the original or the rebuilt content
#[test]
fn test_target_never_missing_when_interrupted() {
    for completed_steps in 0..=6 {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("raw.db");
        create_sqlite_db(&db);
        let original = logical_content(&db);

        let engine = SqliteEngine::new();
        let service = dbmaint_core::services::RebuildService::new(&engine, &db);
        let steps: [&dyn Fn() -> dbmaint_core::Result<()>; 6] = [
            &|| service.remove_stale_dump(),
            &|| service.dump(),
            &|| service.remove_stale_rebuilt(),
            &|| service.restore(),
            &|| service.replace_target(),
            &|| service.remove_dump(),
        ];
        for step in steps.iter().take(completed_steps) {
            step().unwrap();
        }

        assert!(db.is_file(), "target missing after {} steps", completed_steps);
        assert_eq!(logical_content(&db), original);

        let artifacts = service.artifacts();
        assert_eq!(artifacts.dump.exists(), (2..=5).contains(&completed_steps));
        assert_eq!(artifacts.rebuilt.exists(), completed_steps == 4);

        // The next scheduled run picks up after the interruption
        runner(&dir).run(None, Some("dump")).unwrap();
        assert_eq!(logical_content(&db), original);
        assert!(!artifacts.dump.exists());
        assert!(!artifacts.rebuilt.exists());
    }
}

// ============================================================================
// Preconditions
// ============================================================================

#[test]
fn test_unknown_strategy_mutates_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let before = snapshot(dir.path());

    let err = runner(&dir).run(None, Some("compact")).unwrap_err();

    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_missing_database_has_no_side_effects() {
    let dir = TempDir::new().unwrap();

    let err = runner(&dir).run(Some("totals"), Some("dump")).unwrap_err();

    assert!(matches!(err, Error::ResourceNotFound(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("totals.db"));
    assert!(snapshot(dir.path()).is_empty());
}

#[test]
fn test_wrong_identity_reported_before_missing_database() {
    let dir = TempDir::new().unwrap();

    let err = runner_as(&dir, "apache").run(None, None).unwrap_err();

    assert!(matches!(err, Error::Permission(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(snapshot(dir.path()).is_empty());
}

#[test]
fn test_wrong_identity_leaves_database_untouched() {
    let dir = TempDir::new().unwrap();
    create_sqlite_db(&dir.path().join("raw.db"));
    let before = snapshot(dir.path());

    let err = runner_as(&dir, "root").run(None, Some("dump")).unwrap_err();

    assert!(matches!(err, Error::Permission(_)));
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_failed_dump_leaves_target_and_reports_step() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    fs::write(&db, b"definitely not a sqlite database, just some bytes").unwrap();
    let before = fs::read(&db).unwrap();

    let err = runner(&dir).run(None, Some("dump")).unwrap_err();

    assert!(matches!(err, Error::Operation(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("dump"));
    assert_eq!(fs::read(&db).unwrap(), before);
}

// ============================================================================
// Trim
// ============================================================================

fn raw_rows(path: &Path) -> i64 {
    Connection::open(path)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM countme_raw", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_trim_oldest_week_of_raw_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let runner = runner(&dir);

    let prepared = runner
        .prepare_trim(Some("raw"), TrimSelection::OldestWeek)
        .unwrap();
    // The data starts on Sunday 2020-09-13, so its week ends at midnight
    let window = prepared.plan.unwrap().window;
    assert_eq!(window.begin, 1_600_000_120);
    assert_eq!(window.end, 1_600_041_600);
    assert_eq!(prepared.affected(), 462);
    assert_eq!(raw_rows(&db), 2000);

    let report = runner.execute_trim(&prepared).unwrap();
    assert!(report.deleted);
    assert_eq!(report.affected, 462);
    assert_eq!(raw_rows(&db), 2000 - 462);

    let totals: i64 = Connection::open(&db)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM countme_totals", [], |row| row.get(0))
        .unwrap();
    assert_eq!(totals, 2);
}

#[test]
fn test_trim_keeping_more_than_available_deletes_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("raw.db");
    create_sqlite_db(&db);
    let runner = runner(&dir);

    let prepared = runner
        .prepare_trim(None, TrimSelection::keep_weeks(1).unwrap())
        .unwrap();
    assert_eq!(prepared.affected(), 0);
    assert_eq!(runner.execute_trim(&prepared).unwrap().affected, 0);
    assert_eq!(raw_rows(&db), 2000);
}

#[test]
fn test_trim_wrong_identity_leaves_database_untouched() {
    let dir = TempDir::new().unwrap();
    create_sqlite_db(&dir.path().join("raw.db"));
    let before = snapshot(dir.path());

    let err = runner_as(&dir, "root")
        .prepare_trim(None, TrimSelection::OldestWeek)
        .err()
        .unwrap();

    assert!(matches!(err, Error::Permission(_)));
    assert_eq!(snapshot(dir.path()), before);
}
