/*!
 * Response-Time Analysis
 * Integer fixed-point iteration of the response-time recurrence under
 * criticality inheritance
 */

use super::predicates::{
    is_higher_prio_higher_crit, is_higher_prio_same_crit, is_lower_prio_higher_crit,
    members_in_set,
};
use super::TaskParams;
use crate::core::limits::MAX_RTA_ITERATIONS;
use crate::core::types::Nanos;

/// Outcome of one recurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTime {
    /// Fixed point at or before the deadline
    Converged(Nanos),
    /// Passed the deadline (or the iteration bound) at this value
    Exceeded(Nanos),
}

impl ResponseTime {
    #[inline]
    pub const fn value(&self) -> Nanos {
        match self {
            ResponseTime::Converged(r) | ResponseTime::Exceeded(r) => *r,
        }
    }

    #[inline]
    pub const fn is_converged(&self) -> bool {
        matches!(self, ResponseTime::Converged(_))
    }
}

#[inline]
fn ceil_div(a: Nanos, b: Nanos) -> Nanos {
    if b == 0 {
        0
    } else {
        a.div_ceil(b)
    }
}

/// Response time of `demand` for `pivot` against its critical-mode interference
///
/// `R = demand + sum(ceil(R/Tj) * Cj)` over higher-priority reserves of equal or
/// higher criticality, plus one `Cj` per lower-priority higher-criticality
/// reserve. Iterates from `R = demand` until a fixed point or until `R`
/// passes the pivot's period.
pub fn response_time(set: &[TaskParams], pivot: &TaskParams, demand: Nanos) -> ResponseTime {
    let deadline = pivot.period_ns;

    let blocking: Nanos = members_in_set(set, pivot, is_lower_prio_higher_crit)
        .map(|t| t.exec_ns)
        .sum();

    let interferers: Vec<&TaskParams> = members_in_set(set, pivot, |p, o| {
        is_higher_prio_higher_crit(p, o) || is_higher_prio_same_crit(p, o)
    })
    .collect();

    let mut response = demand;
    for _ in 0..MAX_RTA_ITERATIONS {
        let interference: Nanos = interferers
            .iter()
            .map(|t| ceil_div(response, t.period_ns).saturating_mul(t.exec_ns))
            .fold(0, Nanos::saturating_add);
        let next = demand
            .saturating_add(blocking)
            .saturating_add(interference);

        if next > deadline {
            return ResponseTime::Exceeded(next);
        }
        if next == response {
            return ResponseTime::Converged(response);
        }
        response = next;
    }

    tracing::warn!(
        id = pivot.id,
        response,
        "Response-time recurrence hit the iteration bound"
    );
    ResponseTime::Exceeded(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn harmonic() -> Vec<TaskParams> {
        [100u64, 200, 400, 800, 1600]
            .iter()
            .enumerate()
            .map(|(id, p)| TaskParams {
                id,
                period_ns: *p,
                exec_ns: p / 10,
                nominal_exec_ns: p / 20,
                criticality: 1,
            })
            .collect()
    }

    #[test]
    fn test_harmonic_fixed_points() {
        let set = harmonic();
        assert_eq!(response_time(&set, &set[0], 10), ResponseTime::Converged(10));
        assert_eq!(response_time(&set, &set[4], 160), ResponseTime::Converged(360));
    }

    #[test]
    fn test_blocking_term_can_exceed() {
        let set = vec![
            TaskParams {
                id: 0,
                period_ns: 400,
                exec_ns: 200,
                nominal_exec_ns: 200,
                criticality: 1,
            },
            TaskParams {
                id: 1,
                period_ns: 800,
                exec_ns: 500,
                nominal_exec_ns: 250,
                criticality: 2,
            },
        ];
        assert_eq!(response_time(&set, &set[1], 500), ResponseTime::Converged(500));
        assert_eq!(response_time(&set, &set[0], 200), ResponseTime::Exceeded(700));
    }

    #[test]
    fn test_zero_demand() {
        let set = harmonic();
        assert_eq!(response_time(&set, &set[3], 0), ResponseTime::Converged(0));
    }
}
