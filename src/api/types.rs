/*!
 * API Types
 * Tagged requests and responses crossing the client boundary, plus the
 * numeric command codes external tooling uses
 */

use crate::core::errors::SchedulerError;
use crate::core::types::{Nanos, Pid, Rid, SignalNumber};
use crate::reserve::ReserveSpec;
use crate::trace::TraceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Command {
    WaitPeriod = 1,
    CreateReserve = 2,
    AttachReserve = 3,
    DeleteReserve = 4,
    GetWcetNs = 5,
    GetAcetNs = 6,
    NowaitPeriod = 7,
    CaptureEnforcementSignal = 8,
    GetTraceSize = 9,
    EndPeriod = 10,
    WaitRelease = 11,
    TestReserve = 12,
    SendSerial = 13,
    SendSerialFinish = 14,
    InitSerial = 15,
    RecvSerial = 16,
    SimCrash = 17,
}

impl Command {
    pub const ALL: [Command; 17] = [
        Command::WaitPeriod,
        Command::CreateReserve,
        Command::AttachReserve,
        Command::DeleteReserve,
        Command::GetWcetNs,
        Command::GetAcetNs,
        Command::NowaitPeriod,
        Command::CaptureEnforcementSignal,
        Command::GetTraceSize,
        Command::EndPeriod,
        Command::WaitRelease,
        Command::TestReserve,
        Command::SendSerial,
        Command::SendSerialFinish,
        Command::InitSerial,
        Command::RecvSerial,
        Command::SimCrash,
    ];

    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::WaitPeriod => "wait_period",
            Command::CreateReserve => "create_rsv",
            Command::AttachReserve => "attach_rsv",
            Command::DeleteReserve => "delete_rsv",
            Command::GetWcetNs => "get_wcet_ns",
            Command::GetAcetNs => "get_acet_ns",
            Command::NowaitPeriod => "nowait_period",
            Command::CaptureEnforcementSignal => "capture_enforcement_signal",
            Command::GetTraceSize => "get_trace_size",
            Command::EndPeriod => "end_period",
            Command::WaitRelease => "wait_release",
            Command::TestReserve => "test_reserve",
            Command::SendSerial => "send_serial",
            Command::SendSerialFinish => "send_serial_finish",
            Command::InitSerial => "init_serial",
            Command::RecvSerial => "recv_serial",
            Command::SimCrash => "sim_crash",
        }
    }

    /// Handled by a collaborator outside the scheduling core
    pub const fn is_passthrough(self) -> bool {
        matches!(
            self,
            Command::TestReserve
                | Command::SendSerial
                | Command::SendSerialFinish
                | Command::InitSerial
                | Command::RecvSerial
                | Command::SimCrash
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateReserve {
        spec: ReserveSpec,
    },
    AttachReserve {
        rid: Rid,
        pid: Pid,
    },
    DeleteReserve {
        rid: Rid,
    },
    WaitPeriod {
        rid: Rid,
    },
    NowaitPeriod {
        rid: Rid,
    },
    EndPeriod {
        rid: Rid,
    },
    WaitRelease {
        rid: Rid,
    },
    GetWcetNs {
        rid: Rid,
    },
    GetAcetNs {
        rid: Rid,
    },
    CaptureEnforcementSignal {
        rid: Rid,
        pid: Pid,
        signo: SignalNumber,
    },
    GetTraceSize,
    /// Bulk trace read (the device read path, no command code)
    ReadTrace,
    /// Diagnostic and serial commands served by external collaborators
    Passthrough {
        command: Command,
    },
}

impl Request {
    /// Command code; `None` for the trace read
    pub fn command(&self) -> Option<Command> {
        Some(match self {
            Request::CreateReserve { .. } => Command::CreateReserve,
            Request::AttachReserve { .. } => Command::AttachReserve,
            Request::DeleteReserve { .. } => Command::DeleteReserve,
            Request::WaitPeriod { .. } => Command::WaitPeriod,
            Request::NowaitPeriod { .. } => Command::NowaitPeriod,
            Request::EndPeriod { .. } => Command::EndPeriod,
            Request::WaitRelease { .. } => Command::WaitRelease,
            Request::GetWcetNs { .. } => Command::GetWcetNs,
            Request::GetAcetNs { .. } => Command::GetAcetNs,
            Request::CaptureEnforcementSignal { .. } => Command::CaptureEnforcementSignal,
            Request::GetTraceSize => Command::GetTraceSize,
            Request::Passthrough { command } => *command,
            Request::ReadTrace => return None,
        })
    }

    /// Reserve the request targets, if any
    pub fn rid(&self) -> Option<Rid> {
        match self {
            Request::AttachReserve { rid, .. }
            | Request::DeleteReserve { rid }
            | Request::WaitPeriod { rid }
            | Request::NowaitPeriod { rid }
            | Request::EndPeriod { rid }
            | Request::WaitRelease { rid }
            | Request::GetWcetNs { rid }
            | Request::GetAcetNs { rid }
            | Request::CaptureEnforcementSignal { rid, .. } => Some(*rid),
            _ => None,
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Reserve { rid: Rid },
    Done,
    Nanos { value: Nanos },
    TraceSize { records: usize },
    Trace { records: Vec<TraceRecord> },
    Error { code: i32, error: SchedulerError },
}

impl Response {
    pub fn from_error(error: &SchedulerError) -> Self {
        Response::Error {
            code: error.code(),
            error: error.clone(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error { .. })
    }

    /// Integer result as the device interface returns it
    pub fn result_code(&self) -> i64 {
        match self {
            Response::Reserve { rid } => *rid as i64,
            Response::Done => 0,
            Response::Nanos { value } => *value as i64,
            Response::TraceSize { records } => *records as i64,
            Response::Trace { records } => records.len() as i64,
            Response::Error { code, .. } => *code as i64,
        }
    }
}

impl<T: Into<Response>> From<Result<T, SchedulerError>> for Response {
    fn from(result: Result<T, SchedulerError>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(e) => Response::from_error(&e),
        }
    }
}

impl From<()> for Response {
    fn from(_: ()) -> Self {
        Response::Done
    }
}
