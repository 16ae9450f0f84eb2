//! Audit trail helpers.
//!
//! Every mutation the engines perform is described by an [`AuditEntry`];
//! entries travel inside the same [`ChangeSet`](crate::store::ChangeSet) as
//! the mutation they describe, so they land atomically with it.

use chrono::{DateTime, Utc};

use crate::context::ServiceContext;
use crate::error::Result;
use crate::model::{AuditAction, AuditEntry, ChangeSource, EntityKind};

/// Actor recorded for changes made by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

impl AuditEntry {
    /// Starts an entry without field details.
    #[must_use]
    pub fn new(
        entity_kind: EntityKind,
        entity_id: impl ToString,
        action: AuditAction,
        source: ChangeSource,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.to_string(),
            action,
            field: None,
            old_value: None,
            new_value: None,
            source,
            actor: SYSTEM_ACTOR.to_string(),
            reason: None,
            at,
        }
    }

    /// Records a single-field change.
    #[must_use]
    pub fn field(
        mut self,
        field: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.field = Some(field.to_string());
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    /// Records a change of a field that always has a value.
    #[must_use]
    pub fn changed(self, field: &str, old_value: impl ToString, new_value: impl ToString) -> Self {
        self.field(field, Some(old_value.to_string()), Some(new_value.to_string()))
    }

    /// Sets the actor.
    #[must_use]
    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Audit entries for one entity, oldest first.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn history(ctx: &ServiceContext, kind: EntityKind, entity_id: &str) -> Result<Vec<AuditEntry>> {
    Ok(ctx
        .store
        .audit_log()?
        .into_iter()
        .filter(|e| e.entity_kind == kind && e.entity_id == entity_id)
        .collect())
}
