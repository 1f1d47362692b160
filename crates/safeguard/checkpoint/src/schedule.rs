use crate::manager::{CheckpointManager, CheckpointSpec};
use crate::types::CheckpointKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to a periodic checkpoint task.
pub struct ScheduleHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl ScheduleHandle {
    /// Stop the schedule and wait for it to exit. Returns the number of
    /// checkpoints it created.
    pub async fn stop(self) -> u64 {
        let _ = self.stop.send(true);
        self.task.await.unwrap_or(0)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl CheckpointManager {
    /// Create a `Scheduled` checkpoint of `components` every `interval`,
    /// starting one interval from now.
    pub fn spawn_scheduled(self: &Arc<Self>, interval: Duration, components: Vec<String>) -> ScheduleHandle {
        let (stop, mut stopped) = watch::channel(false);
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut created = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let spec = CheckpointSpec::new(format!("scheduled-{}", created + 1), CheckpointKind::Scheduled)
                            .description("periodic checkpoint")
                            .components(components.iter().cloned());
                        match manager.create_checkpoint(spec).await {
                            Ok(_) => created += 1,
                            Err(e) => warn!(error = %e, "Scheduled checkpoint failed"),
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(created, "Checkpoint schedule stopped");
            created
        });
        info!(interval_ms = interval.as_millis() as u64, "Checkpoint schedule started");
        ScheduleHandle { stop, task }
    }
}
