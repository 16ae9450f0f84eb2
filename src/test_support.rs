//! Shared builders for unit tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::adapters::fixed::{FixedClock, RecordingNotifier};
use crate::context::ServiceContext;
use crate::escalation::tokens::issue_token;
use crate::escalation::{raise_alert, NewAlert};
use crate::model::task::fixtures::task;
use crate::model::{
    Alert, AlertType, Availability, Dependency, DependencyId, DependencyType, Program, ProgramId,
    RecordStatus, Resource, ResourceId, Task, TaskId,
};
use crate::store::ChangeSet;

pub(crate) const PROGRAM: &str = "prog-1";

pub(crate) fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

pub(crate) fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, hour, 0, 0).unwrap()
}

/// Context pinned at the given UTC instant, plus handles to its clock and
/// notifier.
pub(crate) fn context_at(now: DateTime<Utc>) -> (ServiceContext, FixedClock, RecordingNotifier) {
    let clock = FixedClock::new(now);
    let notifier = RecordingNotifier::new();
    let ctx = ServiceContext::deterministic(clock.clone(), notifier.clone());
    (ctx, clock, notifier)
}

pub(crate) fn program() -> Program {
    let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
    Program {
        id: ProgramId::new(PROGRAM),
        external_id: PROGRAM.to_string(),
        name: "Program One".to_string(),
        pm_resource_id: None,
        secondary_pm_resource_id: None,
        status: RecordStatus::Active,
        created_at: epoch,
        updated_at: epoch,
    }
}

pub(crate) fn resource(id: &str) -> Resource {
    Resource {
        id: ResourceId::new(id),
        external_id: id.to_string(),
        name: format!("Person {id}"),
        email: Some(format!("{id}@example.com")),
        timezone: "UTC".to_string(),
        country_code: None,
        max_utilization: 100,
        availability: Availability::Active,
        manager_id: None,
        backup_resource_id: None,
    }
}

/// Task owned by the test program, in March 2026.
pub(crate) fn march_task(id: &str, start: u32, end: u32) -> Task {
    task(id, date(3, start), date(3, end))
}

pub(crate) fn link(from: &str, to: &str, kind: DependencyType, lag: i64) -> Dependency {
    Dependency {
        id: DependencyId::new(format!("dep-{from}-{to}")),
        predecessor_id: TaskId::new(from),
        successor_id: TaskId::new(to),
        kind,
        lag_days: lag,
    }
}

pub(crate) fn fs(from: &str, to: &str) -> Dependency {
    link(from, to, DependencyType::FS, 0)
}

/// Writes the test program with the given tasks and dependencies.
pub(crate) fn seed(ctx: &ServiceContext, tasks: Vec<Task>, dependencies: Vec<Dependency>) {
    ctx.store
        .apply(ChangeSet { programs: vec![program()], tasks, dependencies, ..ChangeSet::default() })
        .unwrap();
}

pub(crate) fn stored(ctx: &ServiceContext, id: &str) -> Task {
    ctx.store.task(&TaskId::new(id)).unwrap().unwrap()
}

/// Assigns a task to a resource.
pub(crate) fn owned_by(mut task: Task, owner: &str) -> Task {
    task.resource_id = Some(ResourceId::new(owner));
    task
}

/// Writes the test program with PM `pm`, an `owner` whose backup is `backup`
/// and manager is `boss`, and the given tasks and dependencies.
pub(crate) fn staffed(ctx: &ServiceContext, tasks: Vec<Task>, dependencies: Vec<Dependency>) {
    let mut owner = resource("owner");
    owner.backup_resource_id = Some(ResourceId::new("backup"));
    owner.manager_id = Some(ResourceId::new("boss"));
    let mut program = program();
    program.pm_resource_id = Some(ResourceId::new("pm"));
    ctx.store
        .apply(ChangeSet {
            programs: vec![program],
            resources: vec![owner, resource("backup"), resource("boss"), resource("pm")],
            tasks,
            dependencies,
            ..ChangeSet::default()
        })
        .unwrap();
}

/// Changes a stored resource's availability.
pub(crate) fn set_availability(ctx: &ServiceContext, id: &str, availability: Availability) {
    let mut resource = ctx.store.resource(&ResourceId::new(id)).unwrap().unwrap();
    resource.availability = availability;
    ctx.store.apply(ChangeSet { resources: vec![resource], ..ChangeSet::default() }).unwrap();
}

/// Raises (or reuses) a status check for a stored, owned task and issues a
/// token for it.
pub(crate) fn open_check(ctx: &ServiceContext, id: &str) -> (Alert, String) {
    let task = stored(ctx, id);
    let owner = task.resource_id.clone().unwrap();
    let new = NewAlert {
        recipient: Some(owner.clone()),
        ..NewAlert::now(ctx, AlertType::StatusCheck, task.current_end)
    };
    let alert = raise_alert(ctx, &task, new).unwrap().alert().clone();
    let token = issue_token(ctx, &alert, &owner).unwrap();
    (alert, token)
}
