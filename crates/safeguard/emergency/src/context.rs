use crate::error::{EmergencyError, Result};
use crate::status::{EmergencyStopStatus, StopOutcome, StopReason, Transition, TransitionKind};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Shared emergency state for one agent instance.
///
/// Cheap to clone; every clone observes the same state. All transitions
/// go through [`commit_stop`](Self::commit_stop) and
/// [`commit_resume`](Self::commit_resume), serialized by one mutex.
#[derive(Clone)]
pub struct SafetyContext {
    inner: Arc<EmergencyState>,
}

struct EmergencyState {
    stopped: AtomicBool,
    status: RwLock<EmergencyStopStatus>,
    transition: Mutex<()>,
    generation: AtomicU64,
    in_flight: AtomicUsize,
    drained: Notify,
    history: Mutex<VecDeque<Transition>>,
    history_limit: usize,
}

impl Default for SafetyContext {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl SafetyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(EmergencyState {
                stopped: AtomicBool::new(false),
                status: RwLock::new(EmergencyStopStatus::running()),
                transition: Mutex::new(()),
                generation: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
                history: Mutex::new(VecDeque::new()),
                history_limit: history_limit.max(1),
            }),
        }
    }

    /// Lock-free check.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn status(&self) -> EmergencyStopStatus {
        if !self.is_stopped() {
            return EmergencyStopStatus::running();
        }
        self.inner.status.read().clone()
    }

    /// Incremented on every transition.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn history(&self) -> Vec<Transition> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Commit Running to Stopped. The first reason wins: if already
    /// stopped, the existing status is returned untouched.
    pub fn commit_stop(
        &self,
        reason: StopReason,
        message: impl Into<String>,
        triggered_by: Option<String>,
        detected_at: Instant,
    ) -> StopOutcome {
        let _transition = self.inner.transition.lock();
        if self.is_stopped() {
            return StopOutcome::AlreadyStopped(self.inner.status.read().clone());
        }

        let status = EmergencyStopStatus {
            stopped: true,
            reason: Some(reason),
            message: Some(message.into()),
            stopped_at: Some(Utc::now()),
            resumable: reason.is_resumable(),
            triggered_by,
            response_time: Some(detected_at.elapsed()),
        };
        *self.inner.status.write() = status.clone();
        self.inner.stopped.store(true, Ordering::Release);
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.record(Transition {
            kind: TransitionKind::Stopped,
            at: Utc::now(),
            reason: Some(reason),
            generation,
        });

        StopOutcome::Stopped {
            status,
            shutdown: None,
        }
    }

    /// Commit Stopped to Running, provided no transition happened since
    /// `expected_generation` was read.
    pub fn commit_resume(&self, expected_generation: u64) -> Result<u64> {
        let _transition = self.inner.transition.lock();
        if !self.is_stopped() {
            return Err(EmergencyError::NotStopped);
        }
        if self.generation() != expected_generation {
            return Err(EmergencyError::Conflict);
        }
        let reason = self.inner.status.read().reason;
        self.inner.stopped.store(false, Ordering::Release);
        *self.inner.status.write() = EmergencyStopStatus::running();
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.record(Transition {
            kind: TransitionKind::Resumed,
            at: Utc::now(),
            reason,
            generation,
        });
        Ok(generation)
    }

    fn record(&self, transition: Transition) {
        debug!(kind = ?transition.kind, generation = transition.generation, "Emergency transition");
        let mut history = self.inner.history.lock();
        if history.len() == self.inner.history_limit {
            history.pop_front();
        }
        history.push_back(transition);
    }

    /// Register an in-flight operation. Refused while stopped.
    pub fn enter(&self) -> Result<InFlightGuard> {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard {
            context: self.clone(),
        };
        if self.is_stopped() {
            let reason = self
                .inner
                .status
                .read()
                .reason
                .unwrap_or(StopReason::Manual);
            drop(guard);
            return Err(EmergencyError::StopActive { reason });
        }
        Ok(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no operation is in flight. Returns `false` on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }
}

/// In-flight registration, released on drop.
#[must_use = "the operation counts as in flight only while the guard is held"]
pub struct InFlightGuard {
    context: SafetyContext,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.context.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.context.inner.drained.notify_waiters();
        }
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard").finish_non_exhaustive()
    }
}
