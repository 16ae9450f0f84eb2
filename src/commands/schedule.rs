//! `tracky critical-path`, `tracky propagate` and `tracky impact` commands.

use chrono::NaiveDate;

use super::{parse_reason, print_json, Workspace};
use crate::escalation::preview_impact;
use crate::schedule::{propagate_dependency_dates, recalculate_critical_path};

/// Execute the `critical-path` command.
///
/// # Errors
///
/// Returns an error string if the program is unknown or its graph has a
/// cycle or an over-long chain.
pub fn critical_path(ws: &Workspace, program: &str) -> Result<bool, String> {
    let program = ws.program(program)?;
    let report = recalculate_critical_path(&ws.ctx, &program.id).map_err(|e| e.to_string())?;
    print_json(&report)?;
    Ok(report.updated_count > 0)
}

/// Execute the `propagate` command.
///
/// # Errors
///
/// Returns an error string if the program is unknown or its graph has a
/// cycle or an over-long chain.
pub fn propagate(ws: &Workspace, program: &str) -> Result<bool, String> {
    let program = ws.program(program)?;
    let report = propagate_dependency_dates(&ws.ctx, &program.id).map_err(|e| e.to_string())?;
    if !report.converged {
        eprintln!(
            "warning: propagation stopped after {} passes without converging",
            report.iterations
        );
    }
    print_json(&report)?;
    Ok(report.tasks_shifted > 0)
}

/// Execute the `impact` command. Never writes the snapshot.
///
/// # Errors
///
/// Returns an error string if the program, task or reason is invalid.
pub fn impact(
    ws: &Workspace,
    program: &str,
    task: &str,
    proposed_end: NaiveDate,
    reason: Option<&str>,
) -> Result<bool, String> {
    let program = ws.program(program)?;
    let task = ws.task(&program.id, task)?;
    let reason = reason.map(parse_reason).transpose()?;
    let analysis = preview_impact(&ws.ctx, &task.id, proposed_end, reason.as_ref())
        .map_err(|e| e.to_string())?;
    print_json(&analysis)?;
    Ok(false)
}
