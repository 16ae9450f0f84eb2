//! CLI argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

use crate::model::ReportedStatus;

/// Top-level CLI parser for `tracky`.
#[derive(Debug, Parser)]
#[command(name = "tracky", version, about = "Reconcile project plans and chase status")]
pub struct Cli {
    /// Snapshot file holding the work graph.
    #[arg(long, global = true, env = "TRACKY_STATE")]
    pub state: Option<PathBuf>,
    /// YAML list of holidays for the business calendar.
    #[arg(long, global = true, env = "TRACKY_HOLIDAYS")]
    pub holidays: Option<PathBuf>,
    /// The command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Merge an import batch (YAML or JSON) into the work graph.
    Import {
        /// Batch file.
        file: PathBuf,
        /// Record a baseline version for this import.
        #[arg(long)]
        baseline: bool,
    },
    /// Recompute slack and the critical path of a program.
    CriticalPath {
        /// Program external id.
        program: String,
    },
    /// Push successor dates forward until every dependency holds.
    Propagate {
        /// Program external id.
        program: String,
    },
    /// Raise status checks for deadlines in the look-ahead window.
    Scan,
    /// Send alerts whose send time has come.
    Dispatch,
    /// Close stale alerts and escalate timed-out ones.
    Sweep,
    /// Remind recipients of alerts left unanswered.
    Remind,
    /// Show the escalation chain of a resource.
    Chain {
        /// Resource external id.
        resource: String,
        /// Program whose PMs close the chain.
        #[arg(long)]
        program: Option<String>,
    },
    /// Submit a status response with a magic-link token.
    Respond {
        /// Raw token from the notification.
        token: String,
        /// Reported status.
        #[arg(long, value_enum)]
        status: StatusArg,
        /// Proposed new end date (YYYY-MM-DD).
        #[arg(long)]
        new_date: Option<NaiveDate>,
        /// Delay reason: a category such as `STARTED_LATE`, or an inline
        /// YAML map with the category's details.
        #[arg(long)]
        reason: Option<String>,
        /// Free-form comment.
        #[arg(long)]
        comment: Option<String>,
        /// Date work actually started (YYYY-MM-DD).
        #[arg(long)]
        started_on: Option<NaiveDate>,
        /// Idempotency key; resubmitting with the same key is a no-op.
        #[arg(long)]
        key: Option<String>,
    },
    /// Approve a pending slip.
    Approve {
        /// Response id.
        response: String,
        /// Who decides.
        #[arg(long, default_value = "pm")]
        by: String,
        /// Note recorded with the decision.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject a pending slip.
    Reject {
        /// Response id.
        response: String,
        /// Who decides.
        #[arg(long, default_value = "pm")]
        by: String,
        /// Why the slip was rejected.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Preview what a slip would do, without changing anything.
    Impact {
        /// Program external id.
        program: String,
        /// Task external id.
        task: String,
        /// Proposed end date (YYYY-MM-DD).
        #[arg(long = "to")]
        proposed_end: NaiveDate,
        /// Delay reason, as for `respond`.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a dependency that an import stopped listing.
    AckRemoval {
        /// Program external id.
        program: String,
        /// Dependency id.
        dependency: String,
    },
    /// Show tasks, open alerts and pending approvals.
    Status {
        /// Limit to one program.
        #[arg(long)]
        program: Option<String>,
    },
}

/// Reported status as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Deadline will be met.
    OnTrack,
    /// Deadline will slip.
    Delayed,
    /// Work cannot proceed.
    Blocked,
    /// Work is done.
    Completed,
    /// Work should not happen.
    Cancelled,
}

impl From<StatusArg> for ReportedStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::OnTrack => Self::OnTrack,
            StatusArg::Delayed => Self::Delayed,
            StatusArg::Blocked => Self::Blocked,
            StatusArg::Completed => Self::Completed,
            StatusArg::Cancelled => Self::Cancelled,
        }
    }
}
