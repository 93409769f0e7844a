// tests/coordinator_scenarios.rs

//! Run coordinator behaviour, driven synchronously through the pure core.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;

use pipetick::dag::{FailureKind, RunId, RunRecord, RunStatus, TaskDescriptor, TaskRegistry, TaskStatus};
use pipetick::engine::{
    AttemptResult, CoreCommand, CoreRuntime, CoreStep, RuntimeEvent, RuntimeOptions,
    TriggerReason,
};
use pipetick::events::LifecycleEvent;
use pipetick::types::ConcurrencyLimit;
use pipetick_test_utils::{descriptor, init_tracing, ManualClock, RecordingSink};

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

struct Harness {
    core: CoreRuntime,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    recorded: Vec<RunRecord>,
}

impl Harness {
    fn new(tasks: Vec<TaskDescriptor>, limit: ConcurrencyLimit) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::at(t0()));
        let sink = Arc::new(RecordingSink::new());
        let registry = Arc::new(TaskRegistry::new(tasks).unwrap());
        let core = CoreRuntime::new(
            registry,
            RuntimeOptions {
                exit_when_idle: false,
                max_concurrent_runs: limit,
            },
            clock.clone(),
            sink.clone(),
            1,
        );
        Self {
            core,
            clock,
            sink,
            recorded: Vec::new(),
        }
    }

    fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let step = self.core.step(event);
        self.recorded
            .extend(step.recorded().into_iter().cloned());
        step
    }

    fn trigger(&mut self, fired_at: DateTime<Utc>) -> CoreStep {
        self.clock.set(fired_at);
        self.step(RuntimeEvent::Triggered {
            fired_at,
            reason: TriggerReason::Schedule,
        })
    }

    fn finish(&mut self, run_id: RunId, task: &str, attempt: u32, ok: bool) -> CoreStep {
        let result = if ok {
            AttemptResult::success(Duration::from_secs(1))
        } else {
            AttemptResult::failure(format!("{task} broke"), Duration::from_secs(1))
        };
        self.clock.advance(Duration::from_secs(1));
        self.step(RuntimeEvent::AttemptFinished {
            run_id,
            task: task.to_string(),
            attempt,
            result,
        })
    }

    fn retry_due(&mut self, run_id: RunId, task: &str, attempt: u32) -> CoreStep {
        self.step(RuntimeEvent::RetryDue {
            run_id,
            task: task.to_string(),
            attempt,
        })
    }

    fn record(&self, run_id: RunId) -> &RunRecord {
        self.recorded
            .iter()
            .find(|r| r.run.id == run_id)
            .expect("run recorded")
    }
}

fn with_retries(mut task: TaskDescriptor, retries: u32) -> TaskDescriptor {
    task.max_retries = retries;
    task.retry_delay = Duration::from_secs(120);
    task
}

fn chain(retries_b: u32) -> Vec<TaskDescriptor> {
    vec![
        descriptor("A", &[]),
        with_retries(descriptor("B", &["A"]), retries_b),
        descriptor("C", &["B"]),
    ]
}

#[test]
fn chain_runs_strictly_in_order() {
    let mut h = Harness::new(chain(0), ConcurrencyLimit::Unbounded);

    let step = h.trigger(t0());
    assert_eq!(step.dispatched().len(), 1);
    assert_eq!(step.dispatched()[0].task.name, "A");

    let step = h.finish(1, "A", 1, true);
    let names: Vec<_> = step.dispatched().iter().map(|a| a.task.name.clone()).collect();
    assert_eq!(names, ["B"]);

    h.finish(1, "B", 1, true);
    h.finish(1, "C", 1, true);

    let record = h.record(1);
    assert_eq!(record.run.status, RunStatus::Success);
    let order: Vec<_> = record.executions.iter().map(|e| e.task.as_str()).collect();
    assert_eq!(order, ["A", "B", "C"]);
    assert!(record.executions.iter().all(|e| e.status == TaskStatus::Success));
    assert_eq!(record.run.finished_at, Some(t0() + TimeDelta::seconds(3)));
}

#[test]
fn failed_attempt_within_budget_is_retried_after_delay() {
    let mut h = Harness::new(chain(1), ConcurrencyLimit::Unbounded);
    h.trigger(t0());
    h.finish(1, "A", 1, true);

    let step = h.finish(1, "B", 1, false);
    let retry = step
        .commands
        .iter()
        .find_map(|c| match c {
            CoreCommand::ScheduleRetry(r) => Some(r.clone()),
            _ => None,
        })
        .expect("retry scheduled");
    assert_eq!(retry.attempt, 2);
    assert_eq!(retry.delay, Duration::from_secs(120));
    assert!(step.dispatched().is_empty());

    let step = h.retry_due(1, "B", 2);
    assert_eq!(step.dispatched()[0].attempt, 2);

    h.finish(1, "B", 2, true);
    h.finish(1, "C", 1, true);

    let record = h.record(1);
    assert_eq!(record.run.status, RunStatus::Success);
    let b = record.execution("B").unwrap();
    assert_eq!(b.attempts, 2);
    assert_eq!(b.status, TaskStatus::Success);
    assert_eq!(h.sink.kinds_for(1).iter().filter(|k| **k == "task_retried").count(), 1);
}

#[test]
fn upstream_failure_skips_dependents_transitively() {
    let mut h = Harness::new(chain(0), ConcurrencyLimit::Unbounded);
    h.trigger(t0());

    let step = h.finish(1, "A", 1, false);
    assert!(step.dispatched().is_empty());

    let record = h.record(1);
    assert_eq!(record.run.status, RunStatus::Failed);
    assert_eq!(
        record.execution("A").unwrap().status,
        TaskStatus::Failed(FailureKind::Exhausted)
    );
    for task in ["B", "C"] {
        let exec = record.execution(task).unwrap();
        assert!(exec.status.is_upstream_skip(), "{task}: {:?}", exec.status);
        assert_eq!(exec.attempts, 0);
        assert_eq!(exec.started_at, None);
    }
    // C was skipped because of B, not A.
    assert_eq!(
        record.execution("C").unwrap().status,
        TaskStatus::Failed(FailureKind::UpstreamFailed {
            upstream: "B".to_string()
        })
    );
}

#[test]
fn independent_branch_keeps_running_after_sibling_fails() {
    let tasks = vec![
        descriptor("root", &[]),
        descriptor("bad", &["root"]),
        descriptor("good", &["root"]),
        descriptor("after_bad", &["bad"]),
    ];
    let mut h = Harness::new(tasks, ConcurrencyLimit::Unbounded);
    h.trigger(t0());

    let step = h.finish(1, "root", 1, true);
    assert_eq!(step.dispatched().len(), 2);

    let step = h.finish(1, "bad", 1, false);
    assert!(step.recorded().is_empty(), "good is still running");

    h.finish(1, "good", 1, true);
    let record = h.record(1);
    assert_eq!(record.run.status, RunStatus::Failed);
    assert_eq!(record.execution("good").unwrap().status, TaskStatus::Success);
    assert!(record.execution("after_bad").unwrap().status.is_upstream_skip());
}

#[test]
fn second_trigger_while_single_run_active_is_dropped() {
    let mut h = Harness::new(chain(0), ConcurrencyLimit::AtMost(1));
    let t = t0();
    let t_plus_5 = t + TimeDelta::minutes(5);

    h.trigger(t);
    let step = h.trigger(t_plus_5);
    assert!(step.commands.is_empty());

    h.finish(1, "A", 1, true);
    h.finish(1, "B", 1, true);
    h.finish(1, "C", 1, true);

    assert_eq!(h.recorded.len(), 1);
    assert_eq!(h.recorded[0].run.triggered_at, t);

    let dropped: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::TriggerDropped { fired_at, active_runs } => Some((fired_at, active_runs)),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, [(t_plus_5, 1)]);

    // Once idle, the next tick is admitted again.
    let step = h.trigger(t + TimeDelta::minutes(10));
    assert_eq!(step.dispatched()[0].run_id, 2);
}

#[test]
fn overlapping_runs_progress_independently() {
    let mut h = Harness::new(chain(0), ConcurrencyLimit::Unbounded);
    h.trigger(t0());
    h.trigger(t0() + TimeDelta::minutes(5));

    h.finish(2, "A", 1, false);
    h.finish(1, "A", 1, true);
    h.finish(1, "B", 1, true);
    h.finish(1, "C", 1, true);

    assert_eq!(h.record(1).run.status, RunStatus::Success);
    assert_eq!(h.record(2).run.status, RunStatus::Failed);
}

#[test]
fn cancel_during_retry_wait_fails_the_run_without_further_attempts() {
    let mut h = Harness::new(chain(3), ConcurrencyLimit::Unbounded);
    h.trigger(t0());
    h.finish(1, "A", 1, true);
    h.finish(1, "B", 1, false);

    let step = h.step(RuntimeEvent::CancelRun { run_id: 1 });
    assert!(matches!(step.commands[0], CoreCommand::AbortRun(1)));

    let record = h.record(1).clone();
    assert_eq!(record.run.status, RunStatus::Failed);
    assert_eq!(
        record.execution("B").unwrap().status,
        TaskStatus::Failed(FailureKind::Cancelled)
    );
    assert_eq!(
        record.execution("C").unwrap().status,
        TaskStatus::Failed(FailureKind::Cancelled)
    );

    // The pending retry timer fires later and is ignored.
    let step = h.retry_due(1, "B", 2);
    assert!(step.commands.is_empty());
    assert_eq!(h.recorded.len(), 1);
}

#[test]
fn lifecycle_events_follow_transitions() {
    let mut h = Harness::new(chain(1), ConcurrencyLimit::Unbounded);
    h.trigger(t0());
    h.finish(1, "A", 1, true);
    h.finish(1, "B", 1, false);
    h.retry_due(1, "B", 2);
    h.finish(1, "B", 2, false);

    assert_eq!(
        h.sink.kinds_for(1),
        [
            "run_started",
            "task_started",
            "task_succeeded",
            "task_started",
            "task_retried",
            "task_started",
            "task_failed",
            "task_failed",
            "run_finished",
        ]
    );
}

/// Drive one run where `B` fails every attempt; return B's recorded
/// attempts and how many attempts were dispatched.
fn exhaust(retries: u32) -> (u32, u32, RunStatus) {
    let mut h = Harness::new(chain(retries), ConcurrencyLimit::Unbounded);
    h.trigger(t0());
    h.finish(1, "A", 1, true);

    let mut dispatched = 1;
    let mut attempt = 1;
    loop {
        let step = h.finish(1, "B", attempt, false);
        let retry = step.commands.iter().find_map(|c| match c {
            CoreCommand::ScheduleRetry(r) => Some(r.attempt),
            _ => None,
        });
        match retry {
            Some(next) => {
                let step = h.retry_due(1, "B", next);
                dispatched += step.dispatched().len() as u32;
                attempt = next;
            }
            None => break,
        }
    }

    let record = h.record(1);
    (record.execution("B").unwrap().attempts, dispatched, record.run.status)
}

proptest! {
    #[test]
    fn always_failing_task_makes_exactly_retries_plus_one_attempts(retries in 0u32..6) {
        let (attempts, dispatched, status) = exhaust(retries);
        prop_assert_eq!(attempts, retries + 1);
        prop_assert_eq!(dispatched, retries + 1);
        prop_assert_eq!(status, RunStatus::Failed);
    }

    #[test]
    fn success_on_last_allowed_attempt_succeeds(retries in 0u32..6) {
        let mut h = Harness::new(chain(retries), ConcurrencyLimit::Unbounded);
        h.trigger(t0());
        h.finish(1, "A", 1, true);
        for attempt in 1..=retries {
            h.finish(1, "B", attempt, false);
            h.retry_due(1, "B", attempt + 1);
        }
        h.finish(1, "B", retries + 1, true);
        h.finish(1, "C", 1, true);

        let record = h.record(1);
        prop_assert_eq!(record.run.status, RunStatus::Success);
        prop_assert_eq!(record.execution("B").unwrap().attempts, retries + 1);
    }
}
