/*!
 * Scheduler Configuration
 *
 * Runtime configuration for admission policy, bootstrap mode, and queue sizing
 */

use super::errors::SchedulerError;
use super::limits::{DAEMON_PRIORITY, DEFAULT_WORKER_CORE, DEFERRED_QUEUE_CAPACITY, TRACE_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How admission results are applied at reserve creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Reject reserves whose worst-case response time exceeds their period
    #[default]
    Enforce,
    /// Admit everything, log infeasible reserves
    Advisory,
}

impl std::fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionMode::Enforce => f.write_str("enforce"),
            AdmissionMode::Advisory => f.write_str("advisory"),
        }
    }
}

impl FromStr for AdmissionMode {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enforce" => Ok(AdmissionMode::Enforce),
            "advisory" => Ok(AdmissionMode::Advisory),
            other => Err(SchedulerError::InvalidArgument(format!(
                "unknown admission mode '{}'",
                other
            ))),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Admission policy
    pub admission: AdmissionMode,
    /// Defer first dispatch to a start instant derived from the hypervisor log
    pub secure_bootstrap: bool,
    /// Capacity of the reschedule queue
    pub reschedule_capacity: usize,
    /// Capacity of the activate queue
    pub activate_capacity: usize,
    /// Trace ring capacity
    pub trace_capacity: usize,
    /// Core reserves are pinned to on first activation
    pub worker_core: usize,
    /// Priority of the worker tasks
    pub worker_priority: i32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionMode::Enforce,
            secure_bootstrap: false,
            reschedule_capacity: DEFERRED_QUEUE_CAPACITY,
            activate_capacity: DEFERRED_QUEUE_CAPACITY,
            trace_capacity: TRACE_BUFFER_SIZE,
            worker_core: DEFAULT_WORKER_CORE,
            worker_priority: DAEMON_PRIORITY,
        }
    }
}

impl SchedulerConfig {
    /// Small trace ring for deterministic simulation and tests
    pub const fn simulation() -> Self {
        Self {
            admission: AdmissionMode::Enforce,
            secure_bootstrap: false,
            reschedule_capacity: DEFERRED_QUEUE_CAPACITY,
            activate_capacity: DEFERRED_QUEUE_CAPACITY,
            trace_capacity: 4_096,
            worker_core: DEFAULT_WORKER_CORE,
            worker_priority: DAEMON_PRIORITY,
        }
    }

    /// Hypervisor creates the co-tasks; first dispatch waits for the start timer
    pub const fn secure_bootstrap() -> Self {
        Self {
            admission: AdmissionMode::Enforce,
            secure_bootstrap: true,
            reschedule_capacity: DEFERRED_QUEUE_CAPACITY,
            activate_capacity: DEFERRED_QUEUE_CAPACITY,
            trace_capacity: TRACE_BUFFER_SIZE,
            worker_core: DEFAULT_WORKER_CORE,
            worker_priority: DAEMON_PRIORITY,
        }
    }

    /// Defaults overlaid with ZSRM_* environment variables
    ///
    /// - ZSRM_ADMISSION: enforce | advisory
    /// - ZSRM_SECURE_BOOTSTRAP: 1 | true | 0 | false
    /// - ZSRM_TRACE_CAPACITY: record count
    /// - ZSRM_WORKER_CORE: core index
    pub fn from_env() -> Result<Self, SchedulerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, SchedulerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = lookup("ZSRM_ADMISSION") {
            config.admission = mode.parse()?;
        }
        if let Some(flag) = lookup("ZSRM_SECURE_BOOTSTRAP") {
            config.secure_bootstrap = parse_flag("ZSRM_SECURE_BOOTSTRAP", &flag)?;
        }
        if let Some(capacity) = lookup("ZSRM_TRACE_CAPACITY") {
            config.trace_capacity = parse_number("ZSRM_TRACE_CAPACITY", &capacity)?;
        }
        if let Some(core) = lookup("ZSRM_WORKER_CORE") {
            config.worker_core = parse_number("ZSRM_WORKER_CORE", &core)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject zero-sized queues and rings
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.reschedule_capacity == 0 || self.activate_capacity == 0 {
            return Err(SchedulerError::InvalidArgument(
                "deferred queue capacity must be positive".into(),
            ));
        }
        if self.trace_capacity == 0 {
            return Err(SchedulerError::InvalidArgument(
                "trace capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, SchedulerError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(SchedulerError::InvalidArgument(format!(
            "{} expects a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize, SchedulerError> {
    value.parse().map_err(|_| {
        SchedulerError::InvalidArgument(format!("{} expects a number, got '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overlay() {
        let config = SchedulerConfig::from_lookup(lookup_from(&[
            ("ZSRM_ADMISSION", "Advisory"),
            ("ZSRM_SECURE_BOOTSTRAP", "1"),
            ("ZSRM_TRACE_CAPACITY", "512"),
        ]))
        .unwrap();

        assert_eq!(config.admission, AdmissionMode::Advisory);
        assert!(config.secure_bootstrap);
        assert_eq!(config.trace_capacity, 512);
        assert_eq!(config.worker_core, DEFAULT_WORKER_CORE);
    }

    #[test]
    fn test_malformed_env_rejected() {
        let result = SchedulerConfig::from_lookup(lookup_from(&[("ZSRM_WORKER_CORE", "first")]));
        assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));

        let result = SchedulerConfig::from_lookup(lookup_from(&[("ZSRM_TRACE_CAPACITY", "0")]));
        assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
    }

    #[test]
    fn test_config_json_defaults() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"secure_bootstrap": true}"#).unwrap();
        assert_eq!(config, SchedulerConfig { secure_bootstrap: true, ..SchedulerConfig::default() });
    }
}
