/*!
 * Scheduler Tests
 * Period protocol, rate-monotonic dispatch and budget enforcement driven by
 * the deterministic simulation (one tick per nanosecond)
 */

use mixed_trust_kernel::scheduler::{AttachOutcome, ReserveState, Simulation, WaitOutcome};
use mixed_trust_kernel::{ReserveSpec, SchedulerError, TraceEvent};
use pretty_assertions::assert_eq;

const PERIOD: u64 = 1_000_000;
const BUDGET: u64 = 200_000;

fn simulation(pids: &[i32]) -> Simulation {
    let sim = Simulation::new().unwrap();
    for pid in pids {
        sim.spawn_task(*pid);
    }
    sim
}

fn check(sim: &Simulation) {
    sim.core().check_invariants().unwrap();
}

/// One reserve created and attached to `pid` at the current instant
fn attached(sim: &mut Simulation, spec: ReserveSpec, pid: i32) -> usize {
    let rid = sim.call(|core| core.create_reserve(&spec)).unwrap();
    let outcome = sim.call(|core| core.attach_reserve(rid, pid)).unwrap();
    assert!(matches!(outcome, AttachOutcome::Running));
    check(sim);
    rid
}

#[test]
fn test_round_trip_counts_periods_and_departures() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    assert_eq!(sim.core().running(), Some(rid));

    const JOBS: u64 = 5;
    for job in 0..JOBS {
        sim.advance(100_000).unwrap();
        let outcome = sim.call(|core| core.wait_period(rid)).unwrap();
        let WaitOutcome::Sleep(gate) = outcome else {
            panic!("job {} did not block", job);
        };
        check(&sim);
        assert_eq!(sim.core().state(rid), ReserveState::AttachedWaiting);

        if job + 1 < JOBS {
            sim.run_until((job + 1) * PERIOD).unwrap();
            assert!(gate.consume(), "period {} did not release the task", job + 1);
            assert_eq!(sim.core().running(), Some(rid));
            check(&sim);
        }
    }

    assert_eq!(sim.call(|core| core.wcet_ns(rid)).unwrap(), 100_000);
    assert_eq!(sim.call(|core| core.acet_ns(rid)).unwrap(), 100_000);
    sim.call(|core| core.delete_reserve(rid)).unwrap();

    let trace = sim.core_mut().read_trace();
    let starts = trace.iter().filter(|r| r.event.is_period_start()).count() as u64;
    let departures = trace
        .iter()
        .filter(|r| r.event == TraceEvent::Wfnp)
        .count() as u64;
    assert_eq!(starts, JOBS);
    assert_eq!(departures, JOBS);
    assert_eq!(trace[0].event, TraceEvent::StartPeriod);
    assert!(trace
        .iter()
        .skip(1)
        .filter(|r| r.event.is_period_start())
        .all(|r| r.event == TraceEvent::StartPeriodPeriodicWait));
}

#[test]
fn test_rate_monotonic_priorities_and_dispatch() {
    let mut sim = simulation(&[1, 2, 3]);
    let slow = attached(&mut sim, ReserveSpec::new(4 * PERIOD, 100_000, 1), 1);
    let fast = attached(&mut sim, ReserveSpec::new(PERIOD, 100_000, 1), 2);
    let medium = attached(&mut sim, ReserveSpec::new(2 * PERIOD, 100_000, 1), 3);

    assert_eq!(sim.core().rm_order().unwrap(), vec![fast, medium, slow]);
    assert_eq!(sim.core().ready_order().unwrap(), vec![fast, medium, slow]);
    assert_eq!(sim.core().running(), Some(fast));

    let priority = |rid| sim.core().reserve(rid).unwrap().priority;
    assert_eq!((priority(fast), priority(medium), priority(slow)), (53, 52, 51));

    // Activation pushed the priorities and the core binding to the tasks
    let state = sim.tasks().state(2).unwrap();
    assert_eq!(state.priority, 53);
    assert_eq!(state.core, Some(0));
    assert_eq!(sim.tasks().state(1).unwrap().priority, 51);

    // Fast job completes; medium takes over
    sim.advance(50_000).unwrap();
    sim.call(|core| core.wait_period(fast)).unwrap();
    assert_eq!(sim.core().running(), Some(medium));
    assert_eq!(sim.core().state(slow), ReserveState::Preempted);
    check(&sim);
}

#[test]
fn test_budget_enforcement_suspends_task() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.run_until(300_000).unwrap();
    check(&sim);
    assert_eq!(sim.core().running(), None);
    assert_eq!(sim.core().state(rid), ReserveState::EnforcedBlocked);
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 1);
    assert_eq!(sim.tasks().state(10).unwrap().suspends, 1);

    // The next period replenishes the budget and dispatches it again
    sim.run_until(PERIOD).unwrap();
    assert_eq!(sim.core().state(rid), ReserveState::Running);
    assert_eq!(sim.call(|core| core.wcet_ns(rid)).unwrap(), BUDGET);
    check(&sim);

    let trace = sim.core_mut().read_trace();
    assert!(trace
        .iter()
        .any(|r| r.event == TraceEvent::BudgetEnforcement && r.timestamp_ns == BUDGET));
}

#[test]
fn test_enforcement_notice_keeps_task_running() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    sim.call(|core| core.capture_enforcement_signal(rid, 10, 12))
        .unwrap();

    sim.run_until(BUDGET).unwrap();
    let notices = sim.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].pid, 10);
    assert_eq!(notices[0].signo, 12);
    assert_eq!(notices[0].notice.rid, rid);
    assert!(notices[0].notice.stop);
    assert!(notices[0].notice.periodic);

    // The handler decides; nothing was suspended
    assert_eq!(sim.core().running(), Some(rid));
    assert_eq!(sim.tasks().state(10).unwrap().suspends, 0);

    sim.advance(50_000).unwrap();
    sim.call(|core| core.wait_period(rid)).unwrap();
    check(&sim);
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 1);
}

#[test]
fn test_unregistered_handler_falls_back_to_suspension() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    sim.call(|core| core.capture_enforcement_signal(rid, 10, 12))
        .unwrap();
    sim.call(|core| core.capture_enforcement_signal(rid, -1, 0))
        .unwrap();

    sim.run_until(BUDGET).unwrap();
    assert!(sim.take_notices().is_empty());
    assert_eq!(sim.core().state(rid), ReserveState::EnforcedBlocked);
}

#[test]
fn test_invalid_handler_registration() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    let result = sim.call(|core| core.capture_enforcement_signal(rid, 0, 12));
    assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
    let result = sim.call(|core| core.capture_enforcement_signal(rid, 10, 0));
    assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
}

#[test]
fn test_hypervisor_preemption_postpones_enforcement() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    // Another co-task stole 100us of this job's window
    sim.hypervisor().record_execution(99, 50_000, 150_000);

    sim.run_until(BUDGET).unwrap();
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 0);
    assert_eq!(sim.core().running(), Some(rid));
    check(&sim);

    sim.run_until(BUDGET + 100_000).unwrap();
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 1);
    assert_eq!(sim.core().state(rid), ReserveState::EnforcedBlocked);

    let trace = sim.core_mut().read_trace();
    assert!(trace.iter().any(|r| r.event == TraceEvent::HypExecBefore && r.rid == 99));
}

#[test]
fn test_preemption_credit_survives_trace_drain() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.hypervisor().record_execution(99, 50_000, 150_000);
    sim.advance(160_000).unwrap();
    let drained = sim.core_mut().read_trace();
    assert!(drained.iter().any(|r| r.event == TraceEvent::HypExecAfter && r.rid == 99));
    assert_eq!(sim.core().reserve(rid).unwrap().hyp_observed, 100_000);

    sim.run_until(BUDGET).unwrap();
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 0);
    assert_eq!(sim.core().running(), Some(rid));
    check(&sim);

    sim.run_until(BUDGET + 100_000).unwrap();
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 1);
}

#[test]
fn test_end_period_then_wait_release_after_arrival() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.advance(100_000).unwrap();
    sim.call(|core| core.end_period(rid)).unwrap();
    assert_eq!(sim.core().running(), None);

    // Arrival while the task is not waiting: remembered, not dispatched
    sim.run_until(PERIOD).unwrap();
    assert_eq!(sim.core().running(), None);

    sim.advance(10_000).unwrap();
    let outcome = sim.call(|core| core.wait_release(rid)).unwrap();
    assert!(!outcome.is_sleep());
    assert_eq!(sim.core().running(), Some(rid));
    check(&sim);

    let events: Vec<TraceEvent> = sim
        .core_mut()
        .read_trace()
        .into_iter()
        .map(|r| r.event)
        .filter(|e| !matches!(e, TraceEvent::Preempted | TraceEvent::Resumed))
        .collect();
    assert_eq!(
        events,
        vec![
            TraceEvent::StartPeriod,
            TraceEvent::EndPeriod,
            TraceEvent::StartPeriodNonPeriodicWaitNoWakeup,
            TraceEvent::WaitRelease,
            TraceEvent::WaitReleaseNotBlocked,
        ]
    );
}

#[test]
fn test_wait_release_blocks_until_arrival() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.advance(100_000).unwrap();
    sim.call(|core| core.end_period(rid)).unwrap();
    let WaitOutcome::Sleep(gate) = sim.call(|core| core.wait_release(rid)).unwrap() else {
        panic!("release wait did not block");
    };

    sim.run_until(PERIOD).unwrap();
    assert!(gate.consume());
    assert_eq!(sim.core().running(), Some(rid));
    check(&sim);

    let trace = sim.core_mut().read_trace();
    assert!(trace
        .iter()
        .any(|r| r.event == TraceEvent::StartPeriodNonPeriodicWaitWakeup));
    assert!(trace.iter().any(|r| r.event == TraceEvent::WaitReleaseBlocked));
}

#[test]
fn test_wait_release_without_end_period_is_plain_wait() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.advance(100_000).unwrap();
    let outcome = sim.call(|core| core.wait_release(rid)).unwrap();
    assert!(outcome.is_sleep());

    let trace = sim.core_mut().read_trace();
    assert!(trace.iter().any(|r| r.event == TraceEvent::Wfnp));
    assert!(!trace.iter().any(|r| r.event == TraceEvent::WaitRelease));
}

#[test]
fn test_nowait_period_completes_without_blocking() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.advance(100_000).unwrap();
    sim.call(|core| core.nowait_period(rid)).unwrap();
    assert_eq!(sim.core().running(), None);
    assert_eq!(sim.core().reserve(rid).unwrap().num_wfnp, 1);

    sim.run_until(PERIOD).unwrap();
    assert_eq!(sim.core().running(), Some(rid));
}

#[test]
fn test_overrunning_job_gets_duplicate_arrival_enforced() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    sim.call(|core| core.capture_enforcement_signal(rid, 10, 12))
        .unwrap();

    // Budget exhausted with a handler: the job keeps the CPU into the next period
    sim.run_until(PERIOD).unwrap();
    assert_eq!(sim.call(|core| core.num_enforcements(rid)).unwrap(), 2);
    assert_eq!(sim.core().reserve(rid).unwrap().pending_starts, 1);
    assert_eq!(sim.core().running(), Some(rid));
    check(&sim);

    let trace = sim.core_mut().read_trace();
    assert!(trace.iter().any(|r| r.event == TraceEvent::DontWfnp));
}

#[test]
fn test_vanished_task_reserve_is_reclaimed() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.kill_task(10);
    sim.run_until(PERIOD).unwrap();

    assert!(sim.core().reserve(rid).is_none());
    assert_eq!(sim.core().state(rid), ReserveState::Deleted);
    assert_eq!(sim.core().running(), None);
    assert!(sim.core().rm_order().unwrap().is_empty());
    check(&sim);

    let result = sim.call(|core| core.delete_reserve(rid));
    assert_eq!(result, Err(SchedulerError::InactiveReserve(rid)));
}

#[test]
fn test_deferred_entry_for_reused_slot_is_dropped() {
    let mut sim = simulation(&[10, 11]);
    let first = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    sim.kill_task(10);

    // Fire without draining: the cleanup entry stays queued
    let (at, key) = sim.timers().pop_next().unwrap();
    sim.clock().advance_to(at);
    sim.core_mut().handle_timer(key).unwrap();
    assert_eq!(sim.core().reschedule_queue().len(), 1);

    sim.core_mut().delete_reserve(first).unwrap();
    let spec = ReserveSpec::new(PERIOD, BUDGET, 1);
    let second = sim.core_mut().create_reserve(&spec).unwrap();
    assert_eq!(second, first);
    sim.core_mut().attach_reserve(second, 11).unwrap();
    let outcome = sim.core_mut().wait_period(second).unwrap();
    assert!(outcome.is_sleep());

    sim.core_mut().drain_deferred().unwrap();
    assert_eq!(sim.core().state(second), ReserveState::AttachedWaiting);
    assert!(sim.core().ready_order().unwrap().is_empty());
    assert_eq!(sim.core().running(), None);
    assert_eq!(sim.tasks().state(11).unwrap().wakes, 0);
    check(&sim);
}

#[test]
fn test_lifecycle_errors() {
    let mut sim = simulation(&[10]);
    let spec = ReserveSpec::new(PERIOD, BUDGET, 1);
    let rid = sim.call(|core| core.create_reserve(&spec)).unwrap();

    assert!(matches!(
        sim.call(|core| core.wait_period(rid)),
        Err(SchedulerError::NotAttached(r)) if r == rid
    ));
    assert!(matches!(
        sim.call(|core| core.attach_reserve(rid, 77)),
        Err(SchedulerError::TaskNotFound(77))
    ));
    assert!(matches!(
        sim.call(|core| core.attach_reserve(rid, 0)),
        Err(SchedulerError::InvalidArgument(_))
    ));

    sim.call(|core| core.attach_reserve(rid, 10)).unwrap();
    assert!(matches!(
        sim.call(|core| core.attach_reserve(rid, 10)),
        Err(SchedulerError::AlreadyAttached(r)) if r == rid
    ));

    sim.call(|core| core.delete_reserve(rid)).unwrap();
    assert_eq!(
        sim.call(|core| core.delete_reserve(rid)),
        Err(SchedulerError::InactiveReserve(rid))
    );
    assert!(matches!(
        sim.call(|core| core.delete_reserve(10_000)),
        Err(SchedulerError::InvalidReserve(10_000))
    ));
    check(&sim);
}

#[test]
fn test_deleted_slot_ignores_stale_timers() {
    let mut sim = simulation(&[10, 11]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);
    sim.call(|core| core.delete_reserve(rid)).unwrap();

    // Slot reuse keeps generations moving, so nothing from the old occupant fires
    let reused = sim
        .call(|core| core.create_reserve(&ReserveSpec::new(2 * PERIOD, BUDGET, 1)))
        .unwrap();
    assert_eq!(reused, rid);
    sim.run_until(3 * PERIOD).unwrap();
    assert_eq!(sim.core().state(reused), ReserveState::Idle);
    assert!(sim.core_mut().read_trace().iter().all(|r| r.timestamp_ns == 0));
}

#[test]
fn test_temporal_violation_faults_scheduler() {
    let mut sim = simulation(&[10]);
    let rid = attached(&mut sim, ReserveSpec::new(PERIOD, BUDGET, 1), 10);

    sim.advance(100_000).unwrap();
    sim.call(|core| core.wait_period(rid)).unwrap();
    sim.run_until(PERIOD).unwrap();

    // Clock steps back behind the dispatch instant
    sim.clock().set(PERIOD - 1);
    let result = sim.call(|core| core.wait_period(rid));
    assert!(matches!(result, Err(SchedulerError::TemporalViolation(_))));
    assert!(sim.core().fault().is_some());

    assert_eq!(
        sim.call(|core| core.wcet_ns(rid).map(|_| ())),
        Ok(())
    );
    assert_eq!(
        sim.call(|core| core.delete_reserve(rid)),
        Err(SchedulerError::Faulted)
    );
}
