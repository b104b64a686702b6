/*!
 * Admission Control
 *
 * Worst-case response-time analysis under criticality inheritance, run when
 * a reserve is created. Produces the admission verdict and the zero-slack
 * instant Z: the latest point in the period at which the reserve must enter
 * critical mode so its overload part still completes by the deadline.
 */

pub mod predicates;
mod response_time;

pub use predicates::{
    is_higher_prio_higher_crit, is_higher_prio_lower_crit, is_higher_prio_same_crit,
    is_lower_prio_higher_crit, members_in_set, SetPredicate,
};
pub use response_time::{response_time, ResponseTime};

use crate::core::types::{Criticality, Nanos, Rid};
use crate::reserve::{Reserve, ReserveSpec, ReserveTable};
use serde::{Deserialize, Serialize};

/// Timing view of one task for the analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskParams {
    pub id: usize,
    pub period_ns: Nanos,
    pub exec_ns: Nanos,
    pub nominal_exec_ns: Nanos,
    pub criticality: Criticality,
}

impl TaskParams {
    pub fn from_spec(id: usize, spec: &ReserveSpec) -> Self {
        Self {
            id,
            period_ns: spec.period_ns,
            exec_ns: spec.exec_ns,
            nominal_exec_ns: spec.nominal_exec_ns,
            criticality: spec.criticality,
        }
    }
}

impl From<&Reserve> for TaskParams {
    fn from(r: &Reserve) -> Self {
        Self {
            id: r.rid,
            period_ns: r.period.ns,
            exec_ns: r.exectime.ns,
            nominal_exec_ns: r.nominal_exectime.ns,
            criticality: r.criticality,
        }
    }
}

/// Verdict for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub admitted: bool,
    /// Worst-case response time (the value that passed the deadline when rejected)
    pub response_ns: Nanos,
    /// Zero-slack instant; doubled when it would coincide with the period
    pub zero_slack_ns: Nanos,
}

/// Analyse `candidate` against every other member of `set`
pub fn admit_in(set: &[TaskParams], candidate: &TaskParams) -> Admission {
    let full = response_time(set, candidate, candidate.exec_ns);

    let overload = candidate.exec_ns.saturating_sub(candidate.nominal_exec_ns);
    let slack_needed = response_time(set, candidate, overload).value();
    let mut zero_slack_ns = candidate.period_ns.saturating_sub(slack_needed);
    if zero_slack_ns == candidate.period_ns {
        zero_slack_ns = zero_slack_ns.saturating_mul(2);
    }

    Admission {
        admitted: full.is_converged(),
        response_ns: full.value(),
        zero_slack_ns,
    }
}

/// Analyse reserve `rid` against the active reserves of `table`
pub fn admit(table: &ReserveTable, rid: Rid) -> Admission {
    let set: Vec<TaskParams> = table.iter_active().map(TaskParams::from).collect();
    let candidate = TaskParams::from(&table[rid]);
    admit_in(&set, &candidate)
}

/// Every member passes `admit` against the whole set
pub fn is_schedulable(specs: &[ReserveSpec]) -> bool {
    let set: Vec<TaskParams> = specs
        .iter()
        .enumerate()
        .map(|(id, spec)| TaskParams::from_spec(id, spec))
        .collect();
    set.iter().all(|candidate| admit_in(&set, candidate).admitted)
}
