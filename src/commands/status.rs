//! `tracky status` command.

use super::Workspace;
use crate::model::{AlertStatus, ApprovalStatus, Program, Task};

/// Execute the `status` command.
///
/// Prints one table of tasks per program, followed by open alerts and
/// slips waiting for approval.
///
/// # Errors
///
/// Returns an error string if the program is unknown or the store fails.
pub fn run(ws: &Workspace, program: Option<&str>) -> Result<(), String> {
    let programs = match program {
        Some(external_id) => vec![ws.program(external_id)?],
        None => ws.ctx.store.programs().map_err(|e| e.to_string())?,
    };
    if programs.is_empty() {
        println!("No programs found in store.");
        return Ok(());
    }
    for program in &programs {
        print_program(ws, program)?;
    }
    print_open_alerts(ws, &programs)?;
    print_pending_approvals(ws, &programs)?;
    Ok(())
}

fn print_program(ws: &Workspace, program: &Program) -> Result<(), String> {
    let mut tasks = ws.ctx.store.tasks_for_program(&program.id).map_err(|e| e.to_string())?;
    tasks.sort_by(|a, b| {
        (a.current_start, &a.external_id).cmp(&(b.current_start, &b.external_id))
    });

    println!("{} ({})", program.name, program.external_id);
    if tasks.is_empty() {
        println!("  no tasks\n");
        return Ok(());
    }

    let rows: Vec<[String; 5]> = tasks.iter().map(row).collect();
    let widths: Vec<usize> = (0..5)
        .map(|col| rows.iter().map(|r| r[col].len()).max().unwrap_or(0).max(HEADER[col].len()))
        .collect();

    print_row(&HEADER.map(str::to_string), &widths);
    print_row(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>(), &widths);
    for r in &rows {
        print_row(r, &widths);
    }
    println!();
    Ok(())
}

const HEADER: [&str; 5] = ["TASK", "STATUS", "FORECAST", "SLACK", "FLAGS"];

fn row(task: &Task) -> [String; 5] {
    let mut flags = Vec::new();
    if task.is_critical_path {
        flags.push("critical");
    }
    if task.flag_for_review {
        flags.push("review");
    }
    [
        task.external_id.clone(),
        task.status.label().to_string(),
        format!("{} .. {}", task.current_start, task.current_end),
        task.slack_days.map_or_else(|| "-".to_string(), |s| s.to_string()),
        flags.join(","),
    ]
}

fn print_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) {
    let line: Vec<String> =
        cells.iter().zip(widths).map(|(c, w)| format!("{:<w$}", c.as_ref(), w = *w)).collect();
    println!("  {}", line.join("  ").trim_end());
}

fn print_open_alerts(ws: &Workspace, programs: &[Program]) -> Result<(), String> {
    let mut alerts = ws
        .ctx
        .store
        .alerts_with_status(&[
            AlertStatus::Pending,
            AlertStatus::Sent,
            AlertStatus::Delivered,
            AlertStatus::Opened,
        ])
        .map_err(|e| e.to_string())?;
    alerts.retain(|a| programs.iter().any(|p| p.id == a.program_id));
    alerts.sort_by(|a, b| a.id.cmp(&b.id));
    if alerts.is_empty() {
        return Ok(());
    }

    println!("Open alerts:");
    for alert in &alerts {
        let recipient = alert.actual_recipient_id.as_ref().map_or("-", |r| r.as_str());
        let manual = if alert.requires_manual_intervention { "  MANUAL" } else { "" };
        println!(
            "  {}  {:?} L{} {:?} task={} due={} to={}{manual}",
            alert.id,
            alert.alert_type,
            alert.escalation_level,
            alert.status,
            alert.task_id,
            alert.deadline,
            recipient,
        );
    }
    println!();
    Ok(())
}

fn print_pending_approvals(ws: &Workspace, programs: &[Program]) -> Result<(), String> {
    let mut pending = Vec::new();
    for program in programs {
        for task in ws.ctx.store.tasks_for_program(&program.id).map_err(|e| e.to_string())? {
            let responses = ws.ctx.store.responses_for_task(&task.id).map_err(|e| e.to_string())?;
            pending.extend(
                responses
                    .into_iter()
                    .filter(|r| r.is_latest && r.approval == Some(ApprovalStatus::Pending))
                    .map(|r| (task.external_id.clone(), r)),
            );
        }
    }
    if pending.is_empty() {
        return Ok(());
    }

    println!("Awaiting approval:");
    for (task, response) in &pending {
        println!(
            "  {}  task={} to={} delay={}d",
            response.id,
            task,
            response.proposed_new_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
            response.delay_days.unwrap_or(0),
        );
    }
    Ok(())
}
