/*!
 * Reserve Specification
 * Validated creation parameters for a reserve
 */

use crate::core::errors::SchedulerError;
use crate::core::types::{Criticality, Nanos, Priority};
use serde::{Deserialize, Serialize};

/// Creation parameters, all durations in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReserveSpec {
    pub period_ns: Nanos,
    /// Zero-slack offset within the period; equal to the period disables it
    pub zs_instant_ns: Nanos,
    /// Hypervisor backstop offset; `None` means no co-task
    pub hyp_enforcer_instant_ns: Option<Nanos>,
    pub exec_ns: Nanos,
    /// Budget under nominal (non-overload) conditions
    pub nominal_exec_ns: Nanos,
    /// Initial priority, replaced by the rate-monotonic pass on attach
    pub priority: Priority,
    pub criticality: Criticality,
}

impl ReserveSpec {
    /// Reserve with no zero-slack enforcement, no co-task, nominal == budget
    pub const fn new(period_ns: Nanos, exec_ns: Nanos, criticality: Criticality) -> Self {
        Self {
            period_ns,
            zs_instant_ns: period_ns,
            hyp_enforcer_instant_ns: None,
            exec_ns,
            nominal_exec_ns: exec_ns,
            priority: 0,
            criticality,
        }
    }

    pub const fn with_nominal(mut self, nominal_exec_ns: Nanos) -> Self {
        self.nominal_exec_ns = nominal_exec_ns;
        self
    }

    pub const fn with_zero_slack(mut self, zs_instant_ns: Nanos) -> Self {
        self.zs_instant_ns = zs_instant_ns;
        self
    }

    pub const fn with_hypertask(mut self, hyp_enforcer_instant_ns: Nanos) -> Self {
        self.hyp_enforcer_instant_ns = Some(hyp_enforcer_instant_ns);
        self
    }

    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Zero-slack enforcement requested
    #[inline]
    pub const fn has_zero_slack(&self) -> bool {
        self.zs_instant_ns != self.period_ns
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: String| Err(SchedulerError::InvalidArgument(msg));

        if self.period_ns == 0 {
            return invalid("period must be positive".into());
        }
        if self.exec_ns == 0 {
            return invalid("execution budget must be positive".into());
        }
        if self.exec_ns > self.period_ns {
            return invalid(format!(
                "budget {}ns exceeds period {}ns",
                self.exec_ns, self.period_ns
            ));
        }
        if self.nominal_exec_ns == 0 || self.nominal_exec_ns > self.exec_ns {
            return invalid(format!(
                "nominal budget {}ns must be in 1..={}ns",
                self.nominal_exec_ns, self.exec_ns
            ));
        }
        if self.zs_instant_ns == 0 || self.zs_instant_ns > self.period_ns {
            return invalid(format!(
                "zero-slack instant {}ns must be in 1..={}ns",
                self.zs_instant_ns, self.period_ns
            ));
        }
        if let Some(hyp) = self.hyp_enforcer_instant_ns {
            if hyp == 0 || hyp > self.period_ns {
                return invalid(format!(
                    "hypervisor enforcer instant {}ns must be in 1..={}ns",
                    hyp, self.period_ns
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_disable_zero_slack() {
        let spec = ReserveSpec::new(800, 80, 1);
        assert!(!spec.has_zero_slack());
        assert!(spec.with_zero_slack(600).has_zero_slack());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(ReserveSpec::new(0, 0, 1).validate().is_err());
        assert!(ReserveSpec::new(100, 200, 1).validate().is_err());
        assert!(ReserveSpec::new(100, 50, 1)
            .with_nominal(60)
            .validate()
            .is_err());
        assert!(ReserveSpec::new(100, 50, 1)
            .with_hypertask(150)
            .validate()
            .is_err());
        assert!(ReserveSpec::new(100, 50, 1)
            .with_zero_slack(0)
            .validate()
            .is_err());
    }
}
