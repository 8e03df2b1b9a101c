//! CLI command implementations

pub mod history;
pub mod maintain;
pub mod trim;

use std::path::Path;

use anyhow::Result;
use dbmaint_core::config::Config;
use dbmaint_core::{Error, EventLog, RunEvent};

/// Load the settings file, with environment overrides applied
pub fn load_config(path: &Path) -> Result<Config> {
    Ok(Config::load(path)?)
}

/// Open the event log, if one is configured
///
/// Returns None if logging fails to initialize (shouldn't block maintenance)
pub fn get_event_log(config: &Config) -> Option<EventLog> {
    let dir = config.event_log_dir.as_ref()?;
    EventLog::new(dir, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event and prune old entries, ignoring any errors
pub fn log_event(log: &Option<EventLog>, event: RunEvent, retention_days: u32) {
    if let Some(l) = log {
        let _ = l.log(event);
        let _ = l.prune(retention_days);
    }
}

/// Whether a failed precondition goes into the event log
///
/// Bad arguments and a wrong user never do: such runs must not create or
/// take ownership of the log file.
pub fn is_logged_failure(err: &Error) -> bool {
    !matches!(err, Error::InvalidArgument(_) | Error::Permission(_))
}

/// Record a run that failed before it started, when the failure is loggable
pub fn log_precondition_failure(config: &Config, err: &Error, event: RunEvent) {
    if is_logged_failure(err) {
        log_event(
            &get_event_log(config),
            event.with_error(err.to_string()),
            config.event_log_retention_days,
        );
    }
}
