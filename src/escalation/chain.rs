//! Escalation chain resolution.
//!
//! Level 0 is the task owner, 1 their backup, 2 their manager and 3 the PM
//! tier: program PM, then secondary PM, then the organisation default PM.

use serde::Serialize;
use tracing::{debug, instrument};

use crate::context::ServiceContext;
use crate::error::{Error, Result};
use crate::model::{Availability, ProgramId, Resource, ResourceId, MAX_ESCALATION_LEVEL};

/// Why a resource sits in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRole {
    /// Task owner.
    Primary,
    /// Owner's designated backup.
    Backup,
    /// Owner's line manager.
    Manager,
    /// Program PM.
    ProgramPm,
    /// Program secondary PM.
    SecondaryPm,
    /// Organisation-wide fallback PM.
    DefaultPm,
}

/// One step of an escalation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainEntry {
    /// Escalation level, 0..=3.
    pub level: u8,
    /// Position in the organisation.
    pub role: ChainRole,
    /// The resource, with its current availability.
    pub resource: Resource,
}

impl ChainEntry {
    /// Whether alerts can be routed to this entry right now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.resource.availability.can_receive_alerts()
    }

    fn skip_note(&self) -> String {
        format!(
            "{} ({}): Resource is {}",
            self.resource.name,
            self.resource.external_id,
            availability_label(self.resource.availability)
        )
    }
}

/// First reachable entry at or above a level, and who was passed over.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Resolution {
    /// The entry to notify, if any.
    pub recipient: Option<ChainEntry>,
    /// Unavailable entries skipped on the way, with reasons.
    pub skipped: Vec<String>,
}

fn availability_label(availability: Availability) -> &'static str {
    match availability {
        Availability::Active => "ACTIVE",
        Availability::OnLeave => "ON_LEAVE",
        Availability::Unavailable => "UNAVAILABLE",
        Availability::Partial => "PARTIAL",
    }
}

/// Builds the escalation chain for `resource`, optionally including the PM
/// tier of `program`.
///
/// Missing backup, manager or PM links simply leave their level out.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if `resource` does not exist, or a storage
/// error.
#[instrument(skip(ctx), fields(resource = %resource))]
pub fn resolve_escalation_chain(
    ctx: &ServiceContext,
    resource: &ResourceId,
    program: Option<&ProgramId>,
) -> Result<Vec<ChainEntry>> {
    let primary =
        ctx.store.resource(resource)?.ok_or_else(|| Error::not_found("resource", resource))?;
    let mut chain = Vec::new();

    if let Some(backup) = lookup(ctx, primary.backup_resource_id.as_ref())? {
        chain.push(ChainEntry { level: 1, role: ChainRole::Backup, resource: backup });
    }
    if let Some(manager) = lookup(ctx, primary.manager_id.as_ref())? {
        chain.push(ChainEntry { level: 2, role: ChainRole::Manager, resource: manager });
    }
    chain.insert(0, ChainEntry { level: 0, role: ChainRole::Primary, resource: primary });
    chain.extend(pm_tier(ctx, program)?);

    debug!(entries = chain.len(), "escalation chain resolved");
    Ok(chain)
}

/// Walks the chain from `from_level` and returns the first available entry.
#[must_use]
pub fn find_available(chain: &[ChainEntry], from_level: u8) -> Resolution {
    let mut resolution = Resolution::default();
    for entry in chain.iter().filter(|e| e.level >= from_level) {
        if entry.is_available() {
            resolution.recipient = Some(entry.clone());
            break;
        }
        resolution.skipped.push(entry.skip_note());
    }
    resolution
}

/// The PM who receives approval requests and blocker reports: the first
/// available PM-tier entry, or the first one listed when none is available.
///
/// # Errors
///
/// Returns a storage error.
pub(crate) fn pm_target(ctx: &ServiceContext, program: &ProgramId) -> Result<Option<ChainEntry>> {
    let tier = pm_tier(ctx, Some(program))?;
    let available = tier.iter().find(|e| e.is_available()).cloned();
    Ok(available.or_else(|| tier.into_iter().next()))
}

fn pm_tier(ctx: &ServiceContext, program: Option<&ProgramId>) -> Result<Vec<ChainEntry>> {
    let mut candidates: Vec<(ChainRole, Option<Resource>)> = Vec::new();
    if let Some(program) = program {
        if let Some(program) = ctx.store.program(program)? {
            candidates.push((ChainRole::ProgramPm, lookup(ctx, program.pm_resource_id.as_ref())?));
            candidates.push((
                ChainRole::SecondaryPm,
                lookup(ctx, program.secondary_pm_resource_id.as_ref())?,
            ));
        }
    }
    if let Some(external_id) = ctx.settings.default_pm.as_deref() {
        candidates.push((ChainRole::DefaultPm, ctx.store.resource_by_external_id(external_id)?));
    }

    let mut tier: Vec<ChainEntry> = Vec::new();
    for (role, resource) in candidates {
        let Some(resource) = resource else { continue };
        if tier.iter().any(|e| e.resource.id == resource.id) {
            continue;
        }
        tier.push(ChainEntry { level: MAX_ESCALATION_LEVEL, role, resource });
    }
    Ok(tier)
}

fn lookup(ctx: &ServiceContext, id: Option<&ResourceId>) -> Result<Option<Resource>> {
    match id {
        Some(id) => ctx.store.resource(id),
        None => Ok(None),
    }
}
