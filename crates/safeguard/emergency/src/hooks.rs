use crate::status::{EmergencyStopStatus, ShutdownMode};
use async_trait::async_trait;

/// Check that must pass before a stopped system may resume.
#[async_trait]
pub trait SafetyVerifier: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` carries a human-readable reason.
    async fn verify(&self) -> Result<(), String>;
}

/// Notified once per committed emergency stop.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_emergency_stop(
        &self,
        status: &EmergencyStopStatus,
        mode: ShutdownMode,
    ) -> Result<(), String>;
}
