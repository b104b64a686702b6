/*!
 * Secure Bootstrap Tests
 * Deferred first dispatch anchored on the hypervisor's co-task log
 */

use mixed_trust_kernel::host::Hypervisor;
use mixed_trust_kernel::scheduler::{AttachOutcome, ReserveState, Simulation};
use mixed_trust_kernel::time::Calibration;
use mixed_trust_kernel::timers::TimerKind;
use mixed_trust_kernel::{ReserveSpec, SchedulerConfig, SchedulerError};
use pretty_assertions::assert_eq;

const PERIOD: u64 = 1_000_000;
const PID: i32 = 5;

fn secure_simulation() -> Simulation {
    let sim = Simulation::with_config(SchedulerConfig::secure_bootstrap()).unwrap();
    sim.spawn_task(PID);
    sim
}

fn spec() -> ReserveSpec {
    ReserveSpec::new(PERIOD, 200_000, 2).with_hypertask(900_000)
}

#[test]
fn test_without_log_record_starts_immediately() {
    let mut sim = secure_simulation();
    let rid = sim.call(|core| core.create_reserve(&spec())).unwrap();

    let AttachOutcome::Deferred(gate) = sim.call(|core| core.attach_reserve(rid, PID)).unwrap()
    else {
        panic!("secure attach dispatched at once");
    };
    assert_eq!(sim.core().state(rid), ReserveState::Idle);
    assert!(matches!(
        sim.call(|core| core.attach_reserve(rid, PID)),
        Err(SchedulerError::AlreadyAttached(_))
    ));

    let fired = sim.step().unwrap().unwrap();
    assert_eq!(fired.kind, TimerKind::Start);
    assert_eq!(sim.now(), 0);
    assert!(gate.consume());
    assert_eq!(sim.core().state(rid), ReserveState::Running);

    // The hypervisor owns the co-task; nothing was created from this side
    assert!(sim.hypervisor().is_empty());
    assert!(sim.core().reserve(rid).unwrap().hypertask_active);
    sim.core().check_invariants().unwrap();
}

#[test]
fn test_start_anchored_on_co_task_creation() {
    let mut sim = secure_simulation();
    let rid = sim.call(|core| core.create_reserve(&spec())).unwrap();

    let calibration = Calibration::NANOSECOND;
    sim.hypervisor()
        .create(calibration.span(900_000), calibration.span(PERIOD), 0, rid)
        .unwrap();

    sim.advance(250_000).unwrap();
    let outcome = sim.call(|core| core.attach_reserve(rid, PID)).unwrap();
    assert!(matches!(outcome, AttachOutcome::Deferred(_)));

    sim.step().unwrap();
    assert_eq!(sim.now(), PERIOD);
    assert_eq!(sim.core().running(), Some(rid));
    assert_eq!(sim.core().reserve(rid).unwrap().first_activation, PERIOD);
}

#[test]
fn test_start_projected_past_now() {
    let mut sim = secure_simulation();
    let rid = sim.call(|core| core.create_reserve(&spec())).unwrap();

    let calibration = Calibration::NANOSECOND;
    sim.hypervisor()
        .create(calibration.span(900_000), calibration.span(PERIOD), 0, rid)
        .unwrap();

    sim.advance(2 * PERIOD + PERIOD / 2).unwrap();
    sim.call(|core| core.attach_reserve(rid, PID)).unwrap();

    sim.step().unwrap();
    assert_eq!(sim.now(), 3 * PERIOD);
    assert_eq!(sim.core().running(), Some(rid));
}

#[test]
fn test_start_anchored_on_guest_job_execution() {
    let mut sim = secure_simulation();
    let rid = sim.call(|core| core.create_reserve(&spec())).unwrap();

    // Last job start logged at 100us: next release one period minus the enforcer instant later
    sim.hypervisor().record_execution(rid, 100_000, 150_000);
    sim.advance(150_000).unwrap();
    sim.call(|core| core.attach_reserve(rid, PID)).unwrap();

    sim.step().unwrap();
    assert_eq!(sim.now(), 100_000 + PERIOD - 900_000);
    assert_eq!(sim.core().running(), Some(rid));
}
