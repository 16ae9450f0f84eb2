//! Command dispatch and handlers.
//!
//! Every command loads the snapshot named by `--state`, runs one engine
//! operation against it and, when the operation changed anything, writes
//! the snapshot back.

pub mod alerts;
pub mod import;
pub mod respond;
pub mod schedule;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::adapters::live::filesystem::LiveFileSystem;
use crate::calendar::BusinessCalendar;
use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::context::ServiceContext;
use crate::model::{DelayReason, Program, ProgramId, Task};
use crate::ports::FileSystem;
use crate::store::{snapshot, InMemoryStore, WorkGraphStore};

/// A loaded snapshot plus the context operating on it.
pub struct Workspace {
    /// Context over the loaded store.
    pub ctx: ServiceContext,
    store: Arc<InMemoryStore>,
    path: PathBuf,
}

impl Workspace {
    /// Loads settings, the holiday calendar and the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error string if the settings, holidays or snapshot cannot
    /// be read.
    pub fn open(state: Option<&Path>, holidays: Option<&Path>) -> Result<Self, String> {
        let mut settings = Settings::from_env().map_err(|e| e.to_string())?;
        if let Some(path) = state {
            settings.state_path = path.to_path_buf();
        }
        let fs = LiveFileSystem;
        let mut calendar = BusinessCalendar::from_settings(&settings);
        if let Some(path) = holidays {
            let yaml = fs
                .read_to_string(path)
                .map_err(|e| format!("failed to read holidays {}: {e}", path.display()))?;
            let parsed = BusinessCalendar::parse_holidays(&yaml).map_err(|e| e.to_string())?;
            calendar = calendar.with_holidays(parsed);
        }

        let path = settings.state_path.clone();
        let store = Arc::new(snapshot::load(&fs, &path).map_err(|e| e.to_string())?);
        let shared: Arc<dyn WorkGraphStore> = store.clone();
        let ctx = ServiceContext::live(settings, shared, calendar);
        Ok(Self { ctx, store, path })
    }

    /// Writes the store back to the snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error string if the write fails.
    pub fn save(&self) -> Result<(), String> {
        snapshot::save(self.ctx.fs.as_ref(), &self.path, &self.store).map_err(|e| e.to_string())
    }

    /// Looks up a program by external id.
    ///
    /// # Errors
    ///
    /// Returns an error string if no such program exists.
    pub fn program(&self, external_id: &str) -> Result<Program, String> {
        self.ctx
            .store
            .program_by_external_id(external_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("program not found: {external_id}"))
    }

    /// Looks up a task of a program by external id.
    ///
    /// # Errors
    ///
    /// Returns an error string if the task does not exist or the key is used
    /// in more than one phase.
    pub fn task(&self, program: &ProgramId, external_id: &str) -> Result<Task, String> {
        let mut matches: Vec<Task> = self
            .ctx
            .store
            .tasks_for_program(program)
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|t| t.external_id == external_id)
            .collect();
        match matches.len() {
            0 => Err(format!("task not found: {external_id}")),
            1 => Ok(matches.remove(0)),
            n => Err(format!("task key {external_id} is ambiguous ({n} phases)")),
        }
    }
}

/// Dispatch a parsed command to its handler.
///
/// # Errors
///
/// Returns an error string if the selected command handler fails.
pub fn dispatch(cli: &Cli) -> Result<(), String> {
    let ws = Workspace::open(cli.state.as_deref(), cli.holidays.as_deref())?;
    let changed = dispatch_with_workspace(&cli.command, &ws)?;
    if changed {
        ws.save()?;
    }
    Ok(())
}

/// Runs a command; returns whether the snapshot must be written back.
fn dispatch_with_workspace(command: &Command, ws: &Workspace) -> Result<bool, String> {
    match command {
        Command::Import { file, baseline } => import::run(ws, file, *baseline),
        Command::AckRemoval { program, dependency } => {
            import::ack_removal(ws, program, dependency)
        }
        Command::CriticalPath { program } => schedule::critical_path(ws, program),
        Command::Propagate { program } => schedule::propagate(ws, program),
        Command::Impact { program, task, proposed_end, reason } => {
            schedule::impact(ws, program, task, *proposed_end, reason.as_deref())
        }
        Command::Scan => alerts::scan(ws),
        Command::Dispatch => alerts::dispatch(ws),
        Command::Sweep => alerts::sweep(ws),
        Command::Remind => alerts::remind(ws),
        Command::Chain { resource, program } => alerts::chain(ws, resource, program.as_deref()),
        Command::Respond { token, status, new_date, reason, comment, started_on, key } => {
            respond::respond(
                ws,
                token,
                respond::Answer {
                    status: (*status).into(),
                    new_date: *new_date,
                    reason: reason.as_deref(),
                    comment: comment.as_deref(),
                    started_on: *started_on,
                    key: key.as_deref(),
                },
            )
        }
        Command::Approve { response, by, reason } => {
            respond::decide(ws, response, true, by, reason.as_deref())
        }
        Command::Reject { response, by, reason } => {
            respond::decide(ws, response, false, by, reason.as_deref())
        }
        Command::Status { program } => status::run(ws, program.as_deref()).map(|()| false),
    }
}

/// Prints a result as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

/// Parses a delay reason given either as a bare category or as an inline
/// YAML map.
fn parse_reason(raw: &str) -> Result<DelayReason, String> {
    let raw = raw.trim();
    let yaml = if raw.contains(':') { raw.to_string() } else { format!("category: {raw}") };
    serde_yaml::from_str(&yaml).map_err(|e| format!("invalid delay reason {raw:?}: {e}"))
}
