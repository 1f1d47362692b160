use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Condition checked on every trigger-monitor tick.
///
/// Runs on the dedicated monitor thread, so implementations must be cheap
/// and must not block.
pub trait TriggerCondition: Send + Sync {
    fn is_met(&self) -> bool;

    fn describe(&self) -> String;
}

/// Latest metric values, written by samplers and read by trigger
/// conditions.
#[derive(Debug, Default)]
pub struct SharedGauges {
    values: RwLock<BTreeMap<String, f64>>,
}

impl SharedGauges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, metric: impl Into<String>, value: f64) {
        self.values.write().insert(metric.into(), value);
    }

    pub fn update<I, K>(&self, readings: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut values = self.values.write();
        for (metric, value) in readings {
            values.insert(metric.into(), value);
        }
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.read().get(metric).copied()
    }
}

/// Met when the gauge is strictly above `threshold`. An absent or NaN
/// reading is not met.
pub struct MetricAbove {
    pub gauges: Arc<SharedGauges>,
    pub metric: String,
    pub threshold: f64,
}

impl MetricAbove {
    pub fn new(gauges: Arc<SharedGauges>, metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            gauges,
            metric: metric.into(),
            threshold,
        }
    }
}

impl TriggerCondition for MetricAbove {
    fn is_met(&self) -> bool {
        self.gauges.get(&self.metric).is_some_and(|v| v > self.threshold)
    }

    fn describe(&self) -> String {
        format!("{} > {}", self.metric, self.threshold)
    }
}

/// Met when the gauge is strictly below `threshold`.
pub struct MetricBelow {
    pub gauges: Arc<SharedGauges>,
    pub metric: String,
    pub threshold: f64,
}

impl MetricBelow {
    pub fn new(gauges: Arc<SharedGauges>, metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            gauges,
            metric: metric.into(),
            threshold,
        }
    }
}

impl TriggerCondition for MetricBelow {
    fn is_met(&self) -> bool {
        self.gauges.get(&self.metric).is_some_and(|v| v < self.threshold)
    }

    fn describe(&self) -> String {
        format!("{} < {}", self.metric, self.threshold)
    }
}

/// Externally set latch.
#[derive(Clone, Debug, Default)]
pub struct FlagCondition {
    flag: Arc<AtomicBool>,
}

impl FlagCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl TriggerCondition for FlagCondition {
    fn is_met(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn describe(&self) -> String {
        "flag raised".into()
    }
}

#[derive(Clone)]
pub struct EmergencyTrigger {
    pub name: String,
    pub condition: Arc<dyn TriggerCondition>,
    /// Higher is evaluated first.
    pub priority: i32,
}

impl EmergencyTrigger {
    pub fn new(name: impl Into<String>, condition: impl TriggerCondition + 'static) -> Self {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for EmergencyTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyTrigger")
            .field("name", &self.name)
            .field("condition", &self.condition.describe())
            .field("priority", &self.priority)
            .finish()
    }
}
