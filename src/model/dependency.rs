//! Precedence links between tasks.

use serde::{Deserialize, Serialize};

use super::ids::{DependencyId, TaskId};

/// How a predecessor constrains its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DependencyType {
    /// Successor starts after the predecessor finishes.
    #[default]
    FS,
    /// Successor starts after the predecessor starts.
    SS,
    /// Successor finishes after the predecessor finishes.
    FF,
    /// Successor finishes after the predecessor starts.
    SF,
}

/// A typed, lagged edge in the work graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Internal id.
    pub id: DependencyId,
    /// The constraining task.
    pub predecessor_id: TaskId,
    /// The constrained task.
    pub successor_id: TaskId,
    /// Constraint kind.
    pub kind: DependencyType,
    /// Lag in days; negative values are leads.
    pub lag_days: i64,
}
