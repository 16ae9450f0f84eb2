//! `tracky import` and `tracky ack-removal` commands.

use std::path::Path;

use super::{print_json, Workspace};
use crate::merge::{acknowledge_dependency_removal, merge_import, ImportBatch};
use crate::model::DependencyId;
use crate::ports::FileSystem;

/// Execute the `import` command.
///
/// The batch file may be YAML or JSON. Prints the merge summary.
///
/// # Errors
///
/// Returns an error string if the file cannot be read or parsed, or if the
/// merge aborts.
pub fn run(ws: &Workspace, file: &Path, baseline: bool) -> Result<bool, String> {
    let raw = ws
        .ctx
        .fs
        .read_to_string(file)
        .map_err(|e| format!("failed to read batch {}: {e}", file.display()))?;
    let mut batch: ImportBatch = serde_yaml::from_str(&raw)
        .map_err(|e| format!("failed to parse batch {}: {e}", file.display()))?;
    batch.track_baseline |= baseline;
    if batch.source.is_none() {
        batch.source = Some(file.display().to_string());
    }

    let summary = merge_import(&ws.ctx, &batch).map_err(|e| e.to_string())?;
    for warning in &summary.warnings {
        eprintln!("warning: {warning}");
    }
    print_json(&summary)?;
    Ok(true)
}

/// Execute the `ack-removal` command.
///
/// # Errors
///
/// Returns an error string if the program or dependency is unknown.
pub fn ack_removal(ws: &Workspace, program: &str, dependency: &str) -> Result<bool, String> {
    let program = ws.program(program)?;
    let removed = acknowledge_dependency_removal(
        &ws.ctx,
        &program.id,
        &DependencyId::new(dependency),
        Some("cli"),
    )
    .map_err(|e| e.to_string())?;
    println!(
        "Removed dependency {} ({} -> {}).",
        removed.id, removed.predecessor_id, removed.successor_id
    );
    Ok(true)
}
