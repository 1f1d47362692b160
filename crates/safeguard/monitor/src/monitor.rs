use crate::error::{MonitorError, Result};
use crate::sink::{AlertHandler, AlertSink, MetricsSource};
use crate::types::{Alert, AlertEvent, AlertNotice, AlertThreshold};
use parking_lot::{Mutex, RwLock};
use safeguard_types::now_ms;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    pub sample_interval: Duration,
    /// How long a metric must stay on the safe side before its alert
    /// resolves.
    pub hysteresis: Duration,
    /// Notices kept in [`SafetyMonitor::alert_history`].
    pub history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            hysteresis: Duration::from_secs(30),
            history_limit: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval.is_zero() {
            return Err(MonitorError::Configuration(
                "sample_interval must be greater than zero".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(MonitorError::Configuration(
                "history_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

struct ActiveAlert {
    alert: Alert,
    /// Start of the current uninterrupted run of safe readings.
    safe_since: Option<u64>,
}

#[derive(Default)]
struct AlertState {
    active: BTreeMap<String, ActiveAlert>,
    history: VecDeque<AlertNotice>,
}

/// Threshold alerts over sampled metrics.
pub struct SafetyMonitor {
    config: MonitorConfig,
    thresholds: RwLock<BTreeMap<String, AlertThreshold>>,
    state: Mutex<AlertState>,
    handlers: RwLock<BTreeMap<String, Vec<Arc<dyn AlertHandler>>>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl SafetyMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            thresholds: RwLock::new(BTreeMap::new()),
            state: Mutex::new(AlertState::default()),
            handlers: RwLock::new(BTreeMap::new()),
            sinks: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Add or replace the threshold for a metric.
    pub fn set_threshold(&self, threshold: AlertThreshold) -> Result<()> {
        threshold.validate()?;
        debug!(metric = %threshold.metric, "Alert threshold set");
        self.thresholds
            .write()
            .insert(threshold.metric.clone(), threshold);
        Ok(())
    }

    pub fn thresholds(&self) -> Vec<AlertThreshold> {
        self.thresholds.read().values().cloned().collect()
    }

    pub fn register_alert_handler(&self, metric: impl Into<String>, handler: Arc<dyn AlertHandler>) {
        self.handlers
            .write()
            .entry(metric.into())
            .or_default()
            .push(handler);
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        self.sinks.write().push(sink);
    }

    pub fn get_active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .active
            .values()
            .map(|a| a.alert.clone())
            .collect()
    }

    /// Recent raise, escalation and resolution notices, oldest first.
    pub fn alert_history(&self) -> Vec<AlertNotice> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Update alert state from one sample. No handlers or sinks are
    /// called; see [`process_readings`](Self::process_readings).
    pub fn evaluate(&self, readings: &BTreeMap<String, f64>, now_ms: u64) -> Vec<AlertNotice> {
        let thresholds = self.thresholds.read();
        let hysteresis_ms = self.config.hysteresis.as_millis() as u64;
        let mut state = self.state.lock();
        let mut notices = Vec::new();

        for (metric, threshold) in thresholds.iter() {
            let Some(&value) = readings.get(metric) else {
                continue;
            };
            if value.is_nan() {
                warn!(metric = %metric, "Ignoring NaN reading");
                continue;
            }
            let severity = threshold.classify(value);

            let Some(active) = state.active.get_mut(metric) else {
                if let Some(severity) = severity {
                    let alert = Alert {
                        id: Uuid::new_v4(),
                        metric: metric.clone(),
                        severity,
                        value,
                        threshold: threshold.threshold_for(severity),
                        raised_at: now_ms,
                        escalated_at: None,
                        resolved_at: None,
                    };
                    notices.push(AlertNotice {
                        event: AlertEvent::Raised,
                        alert: alert.clone(),
                    });
                    state.active.insert(
                        metric.clone(),
                        ActiveAlert {
                            alert,
                            safe_since: None,
                        },
                    );
                }
                continue;
            };

            match severity {
                Some(severity) => {
                    active.safe_since = None;
                    if severity > active.alert.severity {
                        active.alert.severity = severity;
                        active.alert.value = value;
                        active.alert.threshold = threshold.threshold_for(severity);
                        active.alert.escalated_at = Some(now_ms);
                        notices.push(AlertNotice {
                            event: AlertEvent::Escalated,
                            alert: active.alert.clone(),
                        });
                    }
                }
                None => {
                    let since = *active.safe_since.get_or_insert(now_ms);
                    if now_ms.saturating_sub(since) >= hysteresis_ms {
                        if let Some(mut resolved) = state.active.remove(metric) {
                            resolved.alert.resolved_at = Some(now_ms);
                            notices.push(AlertNotice {
                                event: AlertEvent::Resolved,
                                alert: resolved.alert,
                            });
                        }
                    }
                }
            }
        }

        for notice in &notices {
            if state.history.len() == self.config.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(notice.clone());
        }
        notices
    }

    /// Evaluate one sample and notify handlers (raise and escalation) and
    /// sinks (every change).
    pub async fn process_readings(&self, readings: &BTreeMap<String, f64>, now_ms: u64) -> Vec<AlertNotice> {
        let notices = self.evaluate(readings, now_ms);
        for notice in &notices {
            self.dispatch(notice).await;
        }
        notices
    }

    async fn dispatch(&self, notice: &AlertNotice) {
        if notice.event != AlertEvent::Resolved {
            let handlers = self
                .handlers
                .read()
                .get(&notice.alert.metric)
                .cloned()
                .unwrap_or_default();
            for handler in handlers {
                if let Err(e) = handler.on_alert(notice).await {
                    warn!(metric = %notice.alert.metric, error = %e, "Alert handler failed");
                }
            }
        }
        self.notify_sinks(notice).await;
    }

    /// As `dispatch`, but each handler runs on its own task so a slow
    /// handler never holds up sinks or later notices.
    async fn dispatch_detached(&self, notice: &AlertNotice) {
        if notice.event != AlertEvent::Resolved {
            let handlers = self
                .handlers
                .read()
                .get(&notice.alert.metric)
                .cloned()
                .unwrap_or_default();
            for handler in handlers {
                let notice = notice.clone();
                tokio::spawn(async move {
                    if let Err(e) = handler.on_alert(&notice).await {
                        warn!(metric = %notice.alert.metric, error = %e, "Alert handler failed");
                    }
                });
            }
        }
        self.notify_sinks(notice).await;
    }

    async fn notify_sinks(&self, notice: &AlertNotice) {
        let sinks: Vec<_> = self.sinks.read().clone();
        futures::future::join_all(sinks.iter().map(|sink| sink.notify(notice))).await;
    }

    /// Sample `source` every `sample_interval` until the handle is
    /// stopped.
    ///
    /// Sampling never waits on handlers or sinks: notices are handed to a
    /// separate dispatch task, so readings keep flowing while a handler is
    /// blocked.
    pub fn start_monitoring(self: &Arc<Self>, source: Arc<dyn MetricsSource>) -> MonitorHandle {
        let (stop, mut stopped) = watch::channel(false);
        let (notices, mut pending) = mpsc::unbounded_channel::<AlertNotice>();
        let dispatcher = {
            let monitor = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(notice) = pending.recv().await {
                    monitor.dispatch_detached(&notice).await;
                }
            })
        };
        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut samples = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match source.current_readings().await {
                            Ok(readings) => {
                                for notice in monitor.evaluate(&readings, now_ms()) {
                                    let _ = notices.send(notice);
                                }
                                samples += 1;
                            }
                            Err(e) => warn!(error = %e, "Metric sampling failed"),
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            drop(notices);
            info!(samples, "Safety monitor stopped");
            samples
        });
        info!(
            interval_ms = self.config.sample_interval.as_millis() as u64,
            thresholds = self.thresholds.read().len(),
            "Safety monitor started"
        );
        MonitorHandle {
            stop,
            task,
            dispatcher,
        }
    }
}

/// Handle to a running monitor loop.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
    dispatcher: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop sampling and wait for the loop to exit and for queued notices
    /// to reach the sinks. Returns the number of samples processed.
    pub async fn stop(self) -> u64 {
        let _ = self.stop.send(true);
        let samples = self.task.await.unwrap_or(0);
        let _ = self.dispatcher.await;
        samples
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
