//! `tracky scan`, `dispatch`, `remind`, `sweep` and `chain` commands.

use std::future::Future;

use super::{print_json, Workspace};
use crate::escalation::{
    dispatch_pending_alerts, resolve_escalation_chain, run_daily_scan, send_reminders,
    DispatchOutcome,
};
use crate::error::Result as EngineResult;

/// Execute the `scan` command.
///
/// # Errors
///
/// Returns an error string if the store fails.
pub fn scan(ws: &Workspace) -> Result<bool, String> {
    let summary = run_daily_scan(&ws.ctx).map_err(|e| e.to_string())?;
    print_json(&summary)?;
    Ok(summary.alerts_created > 0)
}

/// Execute the `dispatch` command.
///
/// # Errors
///
/// Returns an error string if the runtime cannot start or the store fails.
pub fn dispatch(ws: &Workspace) -> Result<bool, String> {
    deliver(dispatch_pending_alerts(&ws.ctx))
}

/// Execute the `remind` command.
///
/// # Errors
///
/// Returns an error string if the runtime cannot start or the store fails.
pub fn remind(ws: &Workspace) -> Result<bool, String> {
    deliver(send_reminders(&ws.ctx))
}

fn deliver(run: impl Future<Output = EngineResult<Vec<DispatchOutcome>>>) -> Result<bool, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let outcomes = runtime.block_on(run).map_err(|e| e.to_string())?;
    print_json(&outcomes)?;
    Ok(!outcomes.is_empty())
}

/// Execute the `sweep` command.
///
/// # Errors
///
/// Returns an error string if the store fails.
pub fn sweep(ws: &Workspace) -> Result<bool, String> {
    let summary = crate::escalation::sweep(&ws.ctx).map_err(|e| e.to_string())?;
    print_json(&summary)?;
    Ok(!summary.is_empty())
}

/// Execute the `chain` command: one line per level with availability.
///
/// # Errors
///
/// Returns an error string if the resource or program is unknown.
pub fn chain(ws: &Workspace, resource: &str, program: Option<&str>) -> Result<bool, String> {
    let resource = ws
        .ctx
        .store
        .resource_by_external_id(resource)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("resource not found: {resource}"))?;
    let program = program.map(|p| ws.program(p)).transpose()?;
    let chain = resolve_escalation_chain(&ws.ctx, &resource.id, program.as_ref().map(|p| &p.id))
        .map_err(|e| e.to_string())?;

    for entry in &chain {
        let mark = if entry.is_available() { "available" } else { "unavailable" };
        println!(
            "L{}  {:<12} {:<24} {}",
            entry.level,
            format!("{:?}", entry.role),
            entry.resource.external_id,
            mark
        );
    }
    Ok(false)
}
