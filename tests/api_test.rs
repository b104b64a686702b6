/*!
 * API Tests
 * Request dispatch through the shared scheduler handle, blocking waits on
 * release gates, and typed sessions
 */

use mixed_trust_kernel::host::LocalTasks;
use mixed_trust_kernel::scheduler::SchedulerCore;
use mixed_trust_kernel::time::{ManualClock, TimeSource};
use mixed_trust_kernel::timers::VirtualTimers;
use mixed_trust_kernel::{
    Command, Request, Response, ReserveSpec, Scheduler, SchedulerConfig, SchedulerError,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const PERIOD: u64 = 1_000_000;
const PID: i32 = 21;

struct Harness {
    scheduler: Scheduler,
    clock: Arc<ManualClock>,
    timers: Arc<VirtualTimers>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let timers = Arc::new(VirtualTimers::new());
        let tasks = Arc::new(LocalTasks::new());
        tasks.register(PID);

        let core = SchedulerCore::builder(clock.clone() as Arc<dyn TimeSource>)
            .with_config(SchedulerConfig::simulation())
            .with_timers(timers.clone())
            .with_tasks(tasks)
            .build()
            .unwrap();

        Self {
            scheduler: Scheduler::new(core),
            clock,
            timers,
        }
    }

    /// Fire every timer due by `deadline`, draining deferred work after each
    fn run_until(&self, deadline: u64) {
        while let Some(next) = self.timers.next_deadline() {
            if next > deadline {
                break;
            }
            let (at, key) = self.timers.pop_next().unwrap();
            self.clock.advance_to(at);
            self.scheduler.with_core(|core| {
                core.handle_timer(key).unwrap();
                core.drain_deferred().unwrap();
            });
        }
        self.clock.advance_to(deadline);
    }

    fn attached_reserve(&self) -> usize {
        let (response, _) = self.scheduler.dispatch(&Request::CreateReserve {
            spec: ReserveSpec::new(PERIOD, 200_000, 1),
        });
        let Response::Reserve { rid } = response else {
            panic!("create failed: {:?}", response);
        };
        let (response, gate) = self
            .scheduler
            .dispatch(&Request::AttachReserve { rid, pid: PID });
        assert_eq!(response, Response::Done);
        assert!(gate.is_none());
        rid
    }
}

#[test]
fn test_dispatch_responses() {
    let harness = Harness::new();
    let rid = harness.attached_reserve();

    harness.run_until(100_000);
    let (response, gate) = harness.scheduler.dispatch(&Request::WaitPeriod { rid });
    assert_eq!(response, Response::Done);
    assert!(gate.is_some());

    harness.run_until(PERIOD);
    let (response, _) = harness.scheduler.dispatch(&Request::GetWcetNs { rid });
    assert_eq!(response, Response::Nanos { value: 100_000 });

    let (response, _) = harness.scheduler.dispatch(&Request::GetTraceSize);
    let Response::TraceSize { records } = response else {
        panic!("unexpected {:?}", response);
    };
    let (response, _) = harness.scheduler.dispatch(&Request::ReadTrace);
    let Response::Trace { records: trace } = response else {
        panic!("unexpected {:?}", response);
    };
    assert_eq!(trace.len(), records);
    assert!(records > 0);

    let (response, _) = harness
        .scheduler
        .dispatch(&Request::Passthrough {
            command: Command::SimCrash,
        });
    assert_eq!(response.result_code(), -14);
}

#[test]
fn test_errors_carry_scheduler_error() {
    let harness = Harness::new();
    let (response, _) = harness.scheduler.dispatch(&Request::DeleteReserve { rid: 3 });
    assert_eq!(
        response,
        Response::Error {
            code: -2,
            error: SchedulerError::InactiveReserve(3),
        }
    );
    assert_eq!(response.result_code(), -2);

    let json = serde_json::to_string(&response).unwrap();
    let back: Response = serde_json::from_str(&json).unwrap();
    assert_eq!(back, response);
}

#[tokio::test]
async fn test_wait_period_blocks_until_release() {
    let harness = Harness::new();
    let rid = harness.attached_reserve();
    harness.run_until(100_000);

    let scheduler = harness.scheduler.clone();
    let waiter = tokio::spawn(async move { scheduler.call(Request::WaitPeriod { rid }).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    harness.run_until(PERIOD);
    let response = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, Response::Done);
    assert_eq!(harness.scheduler.lock().running(), Some(rid));
}

#[tokio::test]
async fn test_delete_wakes_blocked_waiter_with_error() {
    let harness = Harness::new();
    let rid = harness.attached_reserve();

    let scheduler = harness.scheduler.clone();
    let waiter = tokio::spawn(async move { scheduler.call(Request::WaitPeriod { rid }).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (response, _) = harness.scheduler.dispatch(&Request::DeleteReserve { rid });
    assert!(response.is_ok());

    let response = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        Response::Error {
            code: -2,
            error: SchedulerError::InactiveReserve(rid),
        }
    );
}

#[tokio::test]
async fn test_session_round_trip() {
    let harness = Harness::new();
    let session = harness.scheduler.session(PID);
    assert_eq!(session.pid(), PID);
    assert!(!session.id().is_empty());

    let rid = session
        .create(ReserveSpec::new(PERIOD, 200_000, 1))
        .await
        .unwrap();
    session.attach(rid).await.unwrap();
    session.capture_enforcement(rid, 10).await.unwrap();

    harness.run_until(50_000);
    session.nowait_period(rid).await.unwrap();
    harness.run_until(PERIOD);

    assert_eq!(session.wcet_ns(rid).await.unwrap(), 50_000);
    assert_eq!(session.acet_ns(rid).await.unwrap(), 50_000);
    assert!(!session.read_trace().await.unwrap().is_empty());

    session.delete(rid).await.unwrap();
    assert_eq!(
        session.delete(rid).await,
        Err(SchedulerError::InactiveReserve(rid))
    );
}
