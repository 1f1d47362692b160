use crate::error::{EmergencyError, Result};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct EmergencyConfig {
    /// Expected upper bound from detection to committed stop. Exceeding it
    /// is logged.
    pub response_time_bound: Duration,
    /// Trigger monitor tick.
    pub check_interval: Duration,
    /// How long a graceful shutdown waits for in-flight operations.
    pub graceful_timeout: Duration,
    /// Bound on shutdown hooks during a forced shutdown.
    pub forced_timeout: Duration,
    /// Permit `resume_system` with `verify_safety = false`.
    pub allow_unverified_resume: bool,
    pub history_limit: usize,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            response_time_bound: Duration::from_millis(100),
            check_interval: Duration::from_millis(10),
            graceful_timeout: Duration::from_secs(30),
            forced_timeout: Duration::from_secs(5),
            allow_unverified_resume: false,
            history_limit: 256,
        }
    }
}

impl EmergencyConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EmergencyError::Configuration(msg.to_string()));
        if self.check_interval.is_zero() {
            return fail("check_interval must be greater than zero");
        }
        if self.check_interval >= self.response_time_bound {
            return fail("check_interval must be shorter than response_time_bound");
        }
        if self.graceful_timeout.is_zero() || self.forced_timeout.is_zero() {
            return fail("shutdown timeouts must be greater than zero");
        }
        if self.history_limit == 0 {
            return fail("history_limit must be at least 1");
        }
        Ok(())
    }
}
