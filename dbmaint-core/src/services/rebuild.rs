//! Rebuild service - dump, restore into a fresh file, rename over
//!
//! Steps, in order:
//! 1. remove a stale dump artifact
//! 2. dump the target
//! 3. remove a stale rebuilt artifact
//! 4. restore the dump into the rebuilt artifact
//! 5. rename the rebuilt artifact over the target
//! 6. remove the dump artifact
//!
//! A failure at any step stops the run and leaves the artifacts in place
//! for inspection; the next run clears them in steps 1 and 3. The target is
//! only ever replaced by `rename`, so it never goes missing.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::result::{Error, Result};
use crate::ports::MaintenanceEngine;

/// Files an engine keeps next to a database: DuckDB's `.wal`, SQLite's
/// `-wal`, `-shm` and `-journal`
const SIDECAR_SUFFIXES: &[&str] = &[".wal", "-wal", "-shm", "-journal"];

/// Label printed for this strategy
pub const REBUILD_LABEL: &str = "dump -> restore -> rename";

/// Temporary files of a rebuild, derived from the target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildArtifacts {
    /// `<target>.dump`
    pub dump: PathBuf,
    /// `<target>.new`
    pub rebuilt: PathBuf,
}

impl RebuildArtifacts {
    pub fn for_target(target: &Path) -> Self {
        Self {
            dump: with_suffix(target, "dump"),
            rebuilt: with_suffix(target, "new"),
        }
    }

    /// Journal and WAL files a crashed restore may have left beside the
    /// rebuilt database
    pub fn rebuilt_sidecars(&self) -> Vec<PathBuf> {
        SIDECAR_SUFFIXES
            .iter()
            .map(|suffix| {
                let mut name = OsString::from(self.rebuilt.as_os_str());
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Remove a file or directory if it exists
fn remove_artifact(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn io_step(step: &str, result: io::Result<()>) -> Result<()> {
    result.map_err(|e| Error::operation(step, e.into()))
}

/// Rebuilds one database through a dump
pub struct RebuildService<'a> {
    engine: &'a dyn MaintenanceEngine,
    target: PathBuf,
    artifacts: RebuildArtifacts,
}

impl<'a> RebuildService<'a> {
    pub fn new(engine: &'a dyn MaintenanceEngine, target: &Path) -> Self {
        Self {
            engine,
            target: target.to_path_buf(),
            artifacts: RebuildArtifacts::for_target(target),
        }
    }

    pub fn artifacts(&self) -> &RebuildArtifacts {
        &self.artifacts
    }

    /// Run every step in order
    pub fn run(&self) -> Result<()> {
        self.remove_stale_dump()?;
        self.dump()?;
        self.remove_stale_rebuilt()?;
        self.restore()?;
        self.replace_target()?;
        self.remove_dump()?;
        Ok(())
    }

    pub fn remove_stale_dump(&self) -> Result<()> {
        io_step("remove stale dump", remove_artifact(&self.artifacts.dump))
    }

    pub fn dump(&self) -> Result<()> {
        self.engine
            .dump(&self.target, &self.artifacts.dump)
            .map_err(|e| Error::operation("dump", e))
    }

    /// Remove a stale rebuilt database along with its journal and WAL, so
    /// the restore never replays an earlier attempt
    pub fn remove_stale_rebuilt(&self) -> Result<()> {
        io_step(
            "remove stale rebuilt database",
            remove_artifact(&self.artifacts.rebuilt),
        )?;
        for sidecar in self.artifacts.rebuilt_sidecars() {
            io_step("remove stale rebuilt journal", remove_artifact(&sidecar))?;
        }
        Ok(())
    }

    pub fn restore(&self) -> Result<()> {
        self.engine
            .restore(&self.artifacts.dump, &self.artifacts.rebuilt)
            .map_err(|e| Error::operation("restore", e))
    }

    /// Atomically swap the rebuilt file in. Both paths share a directory,
    /// so this is a same-filesystem rename and never a copy.
    pub fn replace_target(&self) -> Result<()> {
        io_step("rename", fs::rename(&self.artifacts.rebuilt, &self.target))?;
        io_step("sync directory", sync_parent_dir(&self.target))
    }

    pub fn remove_dump(&self) -> Result<()> {
        io_step("remove dump", remove_artifact(&self.artifacts.dump))
    }
}

/// Persist the rename itself
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
