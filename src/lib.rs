//! Schedule reconciliation and proactive status tracking.
//!
//! Imports of a project plan are merged into a persistent work graph without
//! losing reported progress. The scheduler keeps slack, the critical path and
//! dependent dates consistent, and the escalation engine chases owners for
//! status ahead of each deadline, walking a backup, manager and PM chain when
//! nobody answers.

pub mod adapters;
pub mod audit;
pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod escalation;
pub mod locks;
pub mod merge;
pub mod model;
pub mod ports;
pub mod schedule;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

use clap::Parser;

/// Run the CLI with the provided arguments.
///
/// # Errors
///
/// Returns an error string when argument parsing fails or command execution fails.
/// Help and version requests print to stdout and succeed.
pub fn run<I, T>(args: I) -> std::result::Result<(), String>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match cli::Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            print!("{err}");
            return Ok(());
        }
        Err(err) => return Err(err.to_string()),
    };
    commands::dispatch(&cli)
}
