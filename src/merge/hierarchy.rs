//! Program, project, phase and resource sync.
//!
//! Insert-or-update keyed on external id. Updates never clear a field the
//! import left blank, and never touch resource availability.

use std::collections::{HashMap, HashSet};

use super::batch::{PhaseRecord, ProgramRecord, ProjectRecord, ResourceRecord};
use super::Merge;
use crate::error::Result;
use crate::model::{
    AuditAction, Availability, EntityKind, Phase, PhaseId, Program, Project, ProjectId,
    RecordStatus, Resource, ResourceId,
};

/// Phase ids keyed by (project external id, phase external id).
pub(super) type PhaseIndex = HashMap<(String, String), PhaseId>;

impl Merge<'_> {
    /// Inserts or updates resources, then resolves manager and backup links.
    pub(super) fn sync_resources(&mut self, records: &[ResourceRecord]) -> Result<()> {
        let mut merged: Vec<(Option<Resource>, Resource, &ResourceRecord)> = Vec::new();
        let mut seen = HashSet::new();

        for record in records {
            if record.external_id.trim().is_empty() || record.name.trim().is_empty() {
                self.error("resource", "resource external id and name are required");
                continue;
            }
            if !seen.insert(record.external_id.clone()) {
                self.error(&record.external_id, "duplicate resource in batch");
                continue;
            }
            let existing = self.ctx.store.resource_by_external_id(&record.external_id)?;
            let mut resource = existing.clone().unwrap_or_else(|| Resource {
                id: ResourceId::new(self.new_id("resource")),
                external_id: record.external_id.clone(),
                name: record.name.clone(),
                email: None,
                timezone: "UTC".to_string(),
                country_code: None,
                max_utilization: 100,
                availability: Availability::Active,
                manager_id: None,
                backup_resource_id: None,
            });
            resource.name.clone_from(&record.name);
            if record.email.is_some() {
                resource.email.clone_from(&record.email);
            }
            if let Some(tz) = &record.timezone {
                resource.timezone.clone_from(tz);
            }
            if record.country_code.is_some() {
                resource.country_code.clone_from(&record.country_code);
            }
            if let Some(max) = record.max_utilization {
                resource.max_utilization = max;
            }
            self.resources.insert(record.external_id.clone(), resource.id.clone());
            merged.push((existing, resource, record));
        }

        for (existing, mut resource, record) in merged {
            if let Some(manager) = &record.manager {
                resource.manager_id =
                    self.link_resource(&record.external_id, "manager", manager)?;
            }
            if let Some(backup) = &record.backup {
                resource.backup_resource_id =
                    self.link_resource(&record.external_id, "backup", backup)?;
            }
            match existing {
                None => {
                    self.summary.resources_created += 1;
                    let entry =
                        self.entry(EntityKind::Resource, &resource.id, AuditAction::Created);
                    self.audit(entry);
                    self.changes.resources.push(resource);
                }
                Some(before) if before != resource => {
                    self.summary.resources_updated += 1;
                    let entry =
                        self.entry(EntityKind::Resource, &resource.id, AuditAction::Updated);
                    self.audit(entry);
                    self.changes.resources.push(resource);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Resolves a manager/backup reference. Unknown references and
    /// self-references are reported and leave the link empty.
    fn link_resource(
        &mut self,
        owner: &str,
        role: &str,
        target: &str,
    ) -> Result<Option<ResourceId>> {
        if owner == target {
            self.error(owner, format!("resource cannot be its own {role}"));
            return Ok(None);
        }
        let resolved = self.resolve_resource(target)?;
        if resolved.is_none() {
            self.warn(format!("Resource {owner}: {role} {target} not found, link skipped"));
        }
        Ok(resolved)
    }

    /// Looks up a resource by external id, batch first.
    pub(super) fn resolve_resource(&self, external_id: &str) -> Result<Option<ResourceId>> {
        if let Some(id) = self.resources.get(external_id) {
            return Ok(Some(id.clone()));
        }
        Ok(self.ctx.store.resource_by_external_id(external_id)?.map(|r| r.id))
    }

    /// Inserts or updates the program record.
    pub(super) fn sync_program(
        &mut self,
        record: &ProgramRecord,
        existing: Option<Program>,
    ) -> Result<()> {
        let pm = self.resolve_pm(record.pm.as_deref(), "PM")?;
        let secondary = self.resolve_pm(record.secondary_pm.as_deref(), "secondary PM")?;

        let mut program = existing.clone().unwrap_or_else(|| Program {
            id: self.program_id.clone(),
            external_id: record.external_id.clone(),
            name: record.name.clone(),
            pm_resource_id: None,
            secondary_pm_resource_id: None,
            status: RecordStatus::Active,
            created_at: self.now,
            updated_at: self.now,
        });
        program.name.clone_from(&record.name);
        program.status = RecordStatus::Active;
        if pm.is_some() {
            program.pm_resource_id = pm;
        }
        if secondary.is_some() {
            program.secondary_pm_resource_id = secondary;
        }

        match existing {
            None => {
                let entry = self.entry(EntityKind::Program, &program.id, AuditAction::Created);
                self.audit(entry);
                self.changes.programs.push(program);
            }
            Some(before) if before != program => {
                program.updated_at = self.now;
                let entry = self.entry(EntityKind::Program, &program.id, AuditAction::Updated);
                self.audit(entry);
                self.changes.programs.push(program);
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn resolve_pm(&mut self, external_id: Option<&str>, role: &str) -> Result<Option<ResourceId>> {
        let Some(external_id) = external_id else {
            return Ok(None);
        };
        let resolved = self.resolve_resource(external_id)?;
        if resolved.is_none() {
            self.warn(format!("Program {role} {external_id} not found, assignment skipped"));
        }
        Ok(resolved)
    }

    /// Inserts or renames projects and phases, returning every phase the
    /// batch can reference.
    pub(super) fn sync_structure(
        &mut self,
        projects: &[ProjectRecord],
        phases: &[PhaseRecord],
    ) -> Result<PhaseIndex> {
        let mut project_ids: HashMap<String, ProjectId> = HashMap::new();
        for record in projects {
            if record.external_id.trim().is_empty() {
                self.error("project", "project external id is empty");
                continue;
            }
            let existing =
                self.ctx.store.project_by_external_id(&self.program_id, &record.external_id)?;
            let project = match existing {
                Some(mut project) => {
                    if project.name != record.name || project.status != RecordStatus::Active {
                        project.name.clone_from(&record.name);
                        project.status = RecordStatus::Active;
                        self.changes.projects.push(project.clone());
                    }
                    project
                }
                None => {
                    let project = Project {
                        id: ProjectId::new(self.new_id("project")),
                        program_id: self.program_id.clone(),
                        external_id: record.external_id.clone(),
                        name: record.name.clone(),
                        status: RecordStatus::Active,
                    };
                    self.changes.projects.push(project.clone());
                    project
                }
            };
            project_ids.insert(record.external_id.clone(), project.id);
        }

        let mut index = PhaseIndex::new();
        for record in phases {
            let Some(project_id) = self.resolve_project(&project_ids, &record.project)? else {
                self.error(&record.external_id, format!("project {} not found", record.project));
                continue;
            };
            let existing = self.ctx.store.phase_by_external_id(&project_id, &record.external_id)?;
            let phase_id = match existing {
                Some(mut phase) => {
                    if phase.name != record.name
                        || phase.sequence != record.sequence
                        || phase.status != RecordStatus::Active
                    {
                        phase.name.clone_from(&record.name);
                        phase.sequence = record.sequence;
                        phase.status = RecordStatus::Active;
                        self.changes.phases.push(phase.clone());
                    }
                    phase.id
                }
                None => {
                    let phase = Phase {
                        id: PhaseId::new(self.new_id("phase")),
                        project_id,
                        program_id: self.program_id.clone(),
                        external_id: record.external_id.clone(),
                        name: record.name.clone(),
                        sequence: record.sequence,
                        status: RecordStatus::Active,
                    };
                    let id = phase.id.clone();
                    self.changes.phases.push(phase);
                    id
                }
            };
            index.insert((record.project.clone(), record.external_id.clone()), phase_id);
        }
        Ok(index)
    }

    fn resolve_project(
        &self,
        batch: &HashMap<String, ProjectId>,
        external_id: &str,
    ) -> Result<Option<ProjectId>> {
        if let Some(id) = batch.get(external_id) {
            return Ok(Some(id.clone()));
        }
        Ok(self.ctx.store.project_by_external_id(&self.program_id, external_id)?.map(|p| p.id))
    }

    /// Finds a phase referenced by a task record, batch first.
    pub(super) fn resolve_phase(
        &self,
        index: &PhaseIndex,
        project: &str,
        phase: &str,
    ) -> Result<Option<PhaseId>> {
        if let Some(id) = index.get(&(project.to_string(), phase.to_string())) {
            return Ok(Some(id.clone()));
        }
        let Some(project) = self.ctx.store.project_by_external_id(&self.program_id, project)? else {
            return Ok(None);
        };
        Ok(self.ctx.store.phase_by_external_id(&project.id, phase)?.map(|p| p.id))
    }
}
