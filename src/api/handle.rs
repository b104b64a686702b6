/*!
 * Scheduler Handle
 *
 * Shared, cloneable access to the scheduling core. Operations run under the
 * core's lock; a client that must sleep until its next release drops the
 * lock first and waits on the reserve's release gate.
 */

use super::types::{Request, Response};
use crate::core::errors::SchedulerError;
use crate::core::types::{Nanos, Pid, Rid, SchedResult, SignalNumber};
use crate::monitoring::{generate_session_id, span_session};
use crate::reserve::{ReleaseGate, ReserveSpec};
use crate::scheduler::{AttachOutcome, SchedulerCore, WaitOutcome};
use crate::trace::TraceRecord;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, Instrument, Span};

/// Cloneable handle to one scheduling core
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Mutex<SchedulerCore>>,
}

impl Scheduler {
    pub fn new(core: SchedulerCore) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SchedulerCore> {
        self.core.lock()
    }

    /// Run `f` with the core locked
    pub fn with_core<T>(&self, f: impl FnOnce(&mut SchedulerCore) -> T) -> T {
        f(&mut self.core.lock())
    }

    /// Serve a request without blocking
    ///
    /// When the caller has to sleep, the release gate to wait on is returned
    /// alongside the response it gets once the gate opens.
    pub fn dispatch(&self, request: &Request) -> (Response, Option<ReleaseGate>) {
        let mut core = self.core.lock();
        match request {
            Request::CreateReserve { spec } => (core.create_reserve(spec).map(reserve).into(), None),
            Request::AttachReserve { rid, pid } => match core.attach_reserve(*rid, *pid) {
                Ok(AttachOutcome::Running) => (Response::Done, None),
                Ok(AttachOutcome::Deferred(gate)) => (Response::Done, Some(gate)),
                Err(e) => (Response::from_error(&e), None),
            },
            Request::DeleteReserve { rid } => (core.delete_reserve(*rid).into(), None),
            Request::WaitPeriod { rid } => sleep_on(core.wait_period(*rid)),
            Request::NowaitPeriod { rid } => (core.nowait_period(*rid).into(), None),
            Request::EndPeriod { rid } => (core.end_period(*rid).into(), None),
            Request::WaitRelease { rid } => sleep_on(core.wait_release(*rid)),
            Request::GetWcetNs { rid } => (core.wcet_ns(*rid).map(nanos).into(), None),
            Request::GetAcetNs { rid } => (core.acet_ns(*rid).map(nanos).into(), None),
            Request::CaptureEnforcementSignal { rid, pid, signo } => (
                core.capture_enforcement_signal(*rid, *pid, *signo).into(),
                None,
            ),
            Request::GetTraceSize => (
                Response::TraceSize {
                    records: core.trace_len(),
                },
                None,
            ),
            Request::ReadTrace => (
                Response::Trace {
                    records: core.read_trace(),
                },
                None,
            ),
            Request::Passthrough { command } => (
                Response::from_error(&SchedulerError::Unsupported(command.name().to_string())),
                None,
            ),
        }
    }

    /// Serve a request, sleeping until the next release when it blocks
    pub async fn call(&self, request: Request) -> Response {
        let (response, gate) = self.dispatch(&request);
        let Some(gate) = gate else {
            return response;
        };

        debug!(command = ?request.command(), "client sleeping until release");
        if gate.wait().await {
            response
        } else {
            let rid = request.rid().unwrap_or_default();
            Response::from_error(&SchedulerError::InactiveReserve(rid))
        }
    }

    /// Client session bound to task `pid`
    pub fn session(&self, pid: Pid) -> Session {
        Session::new(self.clone(), pid)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("strong_count", &Arc::strong_count(&self.core))
            .finish()
    }
}

fn reserve(rid: Rid) -> Response {
    Response::Reserve { rid }
}

fn nanos(value: Nanos) -> Response {
    Response::Nanos { value }
}

fn sleep_on(outcome: SchedResult<WaitOutcome>) -> (Response, Option<ReleaseGate>) {
    match outcome {
        Ok(WaitOutcome::Continue) => (Response::Done, None),
        Ok(WaitOutcome::Sleep(gate)) => (Response::Done, Some(gate)),
        Err(e) => (Response::from_error(&e), None),
    }
}

/// Typed client view for one task
#[derive(Debug, Clone)]
pub struct Session {
    scheduler: Scheduler,
    pid: Pid,
    id: String,
    span: Span,
}

impl Session {
    fn new(scheduler: Scheduler, pid: Pid) -> Self {
        let id = generate_session_id();
        let span = span_session(&id, pid);
        Self {
            scheduler,
            pid,
            id,
            span,
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, request: Request) -> SchedResult<Response> {
        let response = self
            .scheduler
            .call(request)
            .instrument(self.span.clone())
            .await;
        match response {
            Response::Error { error, .. } => Err(error),
            other => Ok(other),
        }
    }

    pub async fn create(&self, spec: ReserveSpec) -> SchedResult<Rid> {
        match self.send(Request::CreateReserve { spec }).await? {
            Response::Reserve { rid } => Ok(rid),
            other => Err(unexpected(other)),
        }
    }

    /// Attach this session's task; returns once the first job is released
    pub async fn attach(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::AttachReserve { rid, pid: self.pid })
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::DeleteReserve { rid }).await.map(|_| ())
    }

    pub async fn wait_period(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::WaitPeriod { rid }).await.map(|_| ())
    }

    pub async fn nowait_period(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::NowaitPeriod { rid }).await.map(|_| ())
    }

    pub async fn end_period(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::EndPeriod { rid }).await.map(|_| ())
    }

    pub async fn wait_release(&self, rid: Rid) -> SchedResult<()> {
        self.send(Request::WaitRelease { rid }).await.map(|_| ())
    }

    /// Deliver budget-enforcement notices for `rid` to this task
    pub async fn capture_enforcement(&self, rid: Rid, signo: SignalNumber) -> SchedResult<()> {
        self.send(Request::CaptureEnforcementSignal {
            rid,
            pid: self.pid,
            signo,
        })
        .await
        .map(|_| ())
    }

    pub async fn wcet_ns(&self, rid: Rid) -> SchedResult<Nanos> {
        match self.send(Request::GetWcetNs { rid }).await? {
            Response::Nanos { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn acet_ns(&self, rid: Rid) -> SchedResult<Nanos> {
        match self.send(Request::GetAcetNs { rid }).await? {
            Response::Nanos { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn read_trace(&self) -> SchedResult<Vec<TraceRecord>> {
        match self.send(Request::ReadTrace).await? {
            Response::Trace { records } => Ok(records),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> SchedulerError {
    SchedulerError::InvalidArgument(format!("unexpected response {:?}", response))
}
