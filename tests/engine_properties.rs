//! End-to-end properties of the engine, driven through the public API.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use tracky::adapters::fixed::{FixedClock, RecordingNotifier};
use tracky::context::ServiceContext;
use tracky::escalation::{dispatch_pending_alerts, run_daily_scan, submit_response};
use tracky::merge::{
    merge_import, DependencyRecord, ImportBatch, MergeAction, PhaseRecord, ProgramRecord,
    ProjectRecord, ResourceRecord, TaskRecord,
};
use tracky::model::{
    AlertType, ApprovalStatus, DependencyType, EscalationPolicy, ProgramId, ReportedStatus,
    ResponseSubmission, Task, WorkStatus,
};
use tracky::schedule::{propagate_dependency_dates, recalculate_critical_path};
use tracky::store::ChangeSet;
use tracky::Error;

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

fn at(month: u32, day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, hour, 0, 0).unwrap()
}

fn context(now: DateTime<Utc>) -> (ServiceContext, FixedClock) {
    let clock = FixedClock::new(now);
    let ctx = ServiceContext::deterministic(clock.clone(), RecordingNotifier::new());
    (ctx, clock)
}

fn person(id: &str, manager: Option<&str>, backup: Option<&str>) -> ResourceRecord {
    ResourceRecord {
        external_id: id.to_string(),
        name: id.to_uppercase(),
        email: Some(format!("{id}@example.com")),
        timezone: None,
        country_code: None,
        max_utilization: None,
        manager: manager.map(str::to_string),
        backup: backup.map(str::to_string),
    }
}

/// One program, one phase, every task owned by `owner` (backup `backup`,
/// manager `boss`, PM `pm`). Tasks are `(key, start day, end day)` in March.
fn batch(tasks: &[(&str, u32, u32)], deps: &[(&str, &str)]) -> ImportBatch {
    ImportBatch {
        program: ProgramRecord {
            external_id: "P1".into(),
            name: "Launch".into(),
            pm: Some("pm".into()),
            secondary_pm: None,
        },
        projects: vec![ProjectRecord { external_id: "PRJ".into(), name: "Project".into() }],
        phases: vec![PhaseRecord {
            project: "PRJ".into(),
            external_id: "PH".into(),
            name: "Build".into(),
            sequence: 1,
        }],
        resources: vec![
            person("pm", None, None),
            person("boss", None, None),
            person("backup", None, None),
            person("owner", Some("boss"), Some("backup")),
        ],
        tasks: tasks
            .iter()
            .map(|&(key, start, end)| TaskRecord {
                project: "PRJ".into(),
                phase: "PH".into(),
                external_id: key.into(),
                name: format!("Task {key}"),
                planned_start: date(3, start),
                planned_end: date(3, end),
                planned_effort_hours: None,
                revenue_impact: None,
                strategic_importance: None,
                resource: Some("owner".into()),
            })
            .collect(),
        dependencies: deps
            .iter()
            .map(|&(from, to)| DependencyRecord {
                predecessor: from.into(),
                successor: to.into(),
                kind: DependencyType::FS,
                lag_days: 0,
            })
            .collect(),
        track_baseline: false,
        source: None,
    }
}

fn import(ctx: &ServiceContext, batch: &ImportBatch) -> ProgramId {
    merge_import(ctx, batch).unwrap().program_id.unwrap()
}

fn task(ctx: &ServiceContext, program: &ProgramId, key: &str) -> Task {
    ctx.store
        .tasks_for_program(program)
        .unwrap()
        .into_iter()
        .find(|t| t.external_id == key)
        .unwrap()
}

fn save(ctx: &ServiceContext, task: Task) {
    ctx.store.apply(ChangeSet { tasks: vec![task], ..ChangeSet::default() }).unwrap();
}

fn set_threshold(ctx: &ServiceContext, program: &ProgramId, days: i64) {
    ctx.store
        .set_escalation_policy(EscalationPolicy {
            program_id: Some(program.clone()),
            auto_approve_delay_up_to_days: days,
            ..EscalationPolicy::default()
        })
        .unwrap();
}

/// Scans and dispatches at `send_at`, returning the raw token of the check
/// sent for `key`.
fn check_token(ctx: &ServiceContext, clock: &FixedClock, send_at: DateTime<Utc>) -> String {
    run_daily_scan(ctx).unwrap();
    clock.set(send_at);
    let outcomes = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(dispatch_pending_alerts(ctx))
        .unwrap();
    let sent: Vec<_> = outcomes.into_iter().filter(|o| o.sent).collect();
    assert_eq!(sent.len(), 1, "exactly one check goes out");
    sent[0].token.clone().unwrap()
}

fn delayed_to(day: u32) -> ResponseSubmission {
    ResponseSubmission {
        reported_status: Some(ReportedStatus::Delayed),
        proposed_new_date: Some(date(3, day)),
        ..ResponseSubmission::default()
    }
}

#[test]
fn reimporting_the_same_batch_changes_nothing() {
    let (ctx, _) = context(at(3, 1, 8));
    let plan = batch(&[("A", 2, 4), ("B", 4, 6)], &[("A", "B")]);
    let program = import(&ctx, &plan);
    let before = ctx.store.tasks_for_program(&program).unwrap();

    let summary = merge_import(&ctx, &plan).unwrap();
    assert_eq!((summary.created, summary.updated), (0, 0));
    assert!(summary.outcomes.iter().all(|o| o.action == MergeAction::Preserved));
    assert_eq!(summary.dependencies_created, 0);
    assert_eq!(ctx.store.tasks_for_program(&program).unwrap(), before);
}

#[test]
fn ghosts_with_progress_are_flagged_and_the_rest_cancelled() {
    let (ctx, _) = context(at(3, 1, 8));
    let program = import(&ctx, &batch(&[("A", 2, 4), ("B", 4, 6), ("C", 6, 8)], &[]));
    let mut started = task(&ctx, &program, "B");
    started.status = WorkStatus::InProgress;
    started.actual_start = Some(date(3, 4));
    started.completion_percent = 40;
    save(&ctx, started);

    let summary = merge_import(&ctx, &batch(&[("A", 2, 4)], &[])).unwrap();
    assert_eq!((summary.cancelled, summary.flagged), (1, 1));

    let b = task(&ctx, &program, "B");
    assert_eq!(b.status, WorkStatus::InProgress);
    assert_eq!(b.actual_start, Some(date(3, 4)));
    assert_eq!(b.completion_percent, 40);
    assert!(b.flag_for_review);
    assert_eq!(task(&ctx, &program, "C").status, WorkStatus::Cancelled);
}

#[test]
fn baseline_update_never_touches_reality() {
    let (ctx, _) = context(at(3, 1, 8));
    let program = import(&ctx, &batch(&[("A", 2, 6)], &[]));
    let mut a = task(&ctx, &program, "A");
    a.current_end = date(3, 9);
    a.actual_start = Some(date(3, 3));
    a.status = WorkStatus::InProgress;
    a.completion_percent = 25;
    save(&ctx, a);

    let summary = merge_import(&ctx, &batch(&[("A", 3, 7)], &[])).unwrap();
    assert_eq!(summary.updated, 1);

    let a = task(&ctx, &program, "A");
    assert_eq!((a.planned_start, a.planned_end), (date(3, 3), date(3, 7)));
    assert_eq!(a.current_end, date(3, 9));
    assert_eq!(a.actual_start, Some(date(3, 3)));
    assert_eq!(a.status, WorkStatus::InProgress);
    assert_eq!(a.completion_percent, 25);
}

#[test]
fn linear_chain_is_entirely_critical() {
    let (ctx, _) = context(at(3, 1, 8));
    let plan = batch(&[("A", 2, 4), ("B", 4, 7), ("C", 7, 11)], &[("A", "B"), ("B", "C")]);

    let report = merge_import(&ctx, &plan).unwrap().critical_path.unwrap();
    assert_eq!(report.critical_tasks, vec!["A", "B", "C"]);
    assert_eq!(report.project_end, Some(date(3, 11)));
}

#[test]
fn diamond_converges_on_the_latest_branch() {
    let (ctx, _) = context(at(3, 1, 8));
    let program = import(
        &ctx,
        &batch(
            &[("A", 2, 3), ("B", 4, 9), ("C", 4, 5), ("D", 6, 7)],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D")],
        ),
    );

    let report = propagate_dependency_dates(&ctx, &program).unwrap();
    assert!(report.converged);
    let d = task(&ctx, &program, "D");
    assert_eq!((d.current_start, d.current_end), (date(3, 10), date(3, 11)));
    assert_eq!(task(&ctx, &program, "C").current_start, date(3, 4));
}

#[test]
fn cycle_is_named_and_leaves_slack_untouched() {
    let (ctx, _) = context(at(3, 1, 8));
    let tasks = [("A", 2, 4), ("B", 4, 6), ("C", 6, 8)];
    let program = import(&ctx, &batch(&tasks, &[("A", "B"), ("B", "C")]));
    let slack_before: Vec<_> =
        ["A", "B", "C"].iter().map(|k| task(&ctx, &program, k).slack_days).collect();

    let summary =
        merge_import(&ctx, &batch(&tasks, &[("A", "B"), ("B", "C"), ("C", "A")])).unwrap();
    assert!(summary.warnings.iter().any(|w| w.contains("critical path not recalculated")));

    let err = recalculate_critical_path(&ctx, &program).unwrap_err();
    let Error::CycleDetected { cycle } = err else {
        panic!("expected a cycle, got {err}");
    };
    assert_eq!(cycle, vec!["A", "B", "C", "A"]);
    let slack_after: Vec<_> =
        ["A", "B", "C"].iter().map(|k| task(&ctx, &program, k).slack_days).collect();
    assert_eq!(slack_after, slack_before);
}

#[test]
fn concurrent_scans_raise_one_alert() {
    let (ctx, _) = context(at(3, 3, 8));
    let program = import(&ctx, &batch(&[("A", 2, 10)], &[]));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| run_daily_scan(&ctx).unwrap());
        }
    });

    let a = task(&ctx, &program, "A");
    let alerts = ctx.store.alerts_for_task(&a.id).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::StatusCheck);
}

#[test]
fn ten_chain_shifts_by_exactly_five_days() {
    let (ctx, _) = context(at(3, 1, 8));
    let keys: Vec<String> = (0..10).map(|i| format!("T{i}")).collect();
    let tasks: Vec<(&str, u32, u32)> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| {
            let start = 2 + 2 * u32::try_from(i).unwrap();
            (k.as_str(), start, start + 1)
        })
        .collect();
    let deps: Vec<(&str, &str)> = keys.windows(2).map(|w| (w[0].as_str(), w[1].as_str())).collect();
    let program = import(&ctx, &batch(&tasks, &deps));

    let mut first = task(&ctx, &program, "T0");
    first.current_end = date(3, 8);
    save(&ctx, first);

    let report = propagate_dependency_dates(&ctx, &program).unwrap();
    assert!(report.converged);
    assert!(report.iterations <= 10);
    assert_eq!(report.tasks_shifted, 9);
    assert!(report.shifts.values().all(|&days| days == 5));
    assert_eq!(task(&ctx, &program, "T9").current_end, date(3, 26));
}

#[test]
fn auto_approval_threshold_splits_small_and_large_slips() {
    let (ctx, clock) = context(at(3, 3, 8));
    let program = import(&ctx, &batch(&[("A", 2, 10), ("B", 2, 10)], &[]));
    set_threshold(&ctx, &program, 2);

    run_daily_scan(&ctx).unwrap();
    clock.set(at(3, 9, 9));
    let outcomes = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(dispatch_pending_alerts(&ctx))
        .unwrap();
    let a_id = task(&ctx, &program, "A").id;
    let token_for = |id| {
        let alert = ctx
            .store
            .alerts_for_task(id)
            .unwrap()
            .into_iter()
            .find(|a| a.alert_type == AlertType::StatusCheck)
            .unwrap();
        outcomes.iter().find(|o| o.alert_id == alert.id).unwrap().token.clone().unwrap()
    };

    let small = submit_response(&ctx, &token_for(&a_id), delayed_to(11), None).unwrap();
    assert_eq!(small.approval, Some(ApprovalStatus::AutoApproved));
    assert_eq!(task(&ctx, &program, "A").current_end, date(3, 11));

    let b_id = task(&ctx, &program, "B").id;
    let large = submit_response(&ctx, &token_for(&b_id), delayed_to(13), None).unwrap();
    assert_eq!(large.approval, Some(ApprovalStatus::Pending));
    assert_eq!(task(&ctx, &program, "B").current_end, date(3, 10));
}

#[test]
fn each_new_answer_supersedes_the_last() {
    let (ctx, clock) = context(at(3, 3, 8));
    let program = import(&ctx, &batch(&[("A", 2, 10)], &[]));
    set_threshold(&ctx, &program, 2);

    let first = check_token(&ctx, &clock, at(3, 9, 9));
    submit_response(&ctx, &first, delayed_to(11), None).unwrap();
    let second = check_token(&ctx, &clock, at(3, 10, 9));
    submit_response(&ctx, &second, delayed_to(12), None).unwrap();
    let third = check_token(&ctx, &clock, at(3, 11, 9));
    let on_track =
        ResponseSubmission { reported_status: Some(ReportedStatus::OnTrack), ..Default::default() };
    submit_response(&ctx, &third, on_track, None).unwrap();

    let a = task(&ctx, &program, "A");
    assert_eq!(a.current_end, date(3, 12));
    let history = ctx.store.responses_for_task(&a.id).unwrap();
    let versions: Vec<_> = history
        .iter()
        .map(|r| (r.response_version, r.is_latest, r.superseded_by_version))
        .collect();
    assert_eq!(versions, vec![(1, false, Some(2)), (2, false, Some(3)), (3, true, None)]);

    let reused = submit_response(&ctx, &third, ResponseSubmission::default(), None);
    assert!(matches!(reused, Err(Error::TokenAlreadyUsed)));
}
