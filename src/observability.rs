//! Structured logging for TDB.
//!
//! Every event goes through `tracing` with target "tdb" and carries an
//! `event` field; most also name the emitting `component` ("node",
//! "scheduler", "replication", "db").
//!
//! ## Library Integration
//!
//! TDB never installs a global subscriber. Applications pick one, e.g.
//! `tracing_subscriber::fmt().with_env_filter("tdb=debug")`.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `database` / `cluster`: database key parts where relevant
//! - Use `%` for Display, `?` for Debug formatting
//! - Query text is never logged above debug level

/// Target for all TDB log events.
pub(crate) const TDB_TARGET: &str = "tdb";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "node",
///     event = "database_opened",
///     database = %key,
///     tables = catalog.len(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TDB_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TDB_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TDB_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::TDB_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
