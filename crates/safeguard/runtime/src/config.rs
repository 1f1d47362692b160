//! TOML configuration for the safety layer.
//!
//! Every section rejects unknown keys. Missing keys take the component
//! defaults, so an empty file is a valid configuration.

use crate::error::ConfigError;
use safeguard_checkpoint::{CheckpointConfig, RetentionPolicy};
use safeguard_constraints::{
    Constraint, ConstraintKind, ConstraintRule, ContextValueThreshold, FlagRequired, MetricAtLeast,
    MetricAtMost, ViolationAction,
};
use safeguard_emergency::{EmergencyConfig, EmergencyTrigger, MetricAbove, MetricBelow, SharedGauges};
use safeguard_monitor::{AlertThreshold, Direction, MonitorConfig};
use safeguard_pipeline::PipelineConfig;
use safeguard_risk::{MetricRatioScorer, RiskAssessor, RiskFactor, RiskThresholds};
use safeguard_types::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    pub pipeline: PipelineSection,
    pub risk: RiskSection,
    pub checkpoint: CheckpointSection,
    pub emergency: EmergencySection,
    pub monitor: MonitorSection,
    pub constraints: Vec<ConstraintSpec>,
}

impl SafetyConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SafetyConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check every section, including the component configs they map to.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.risk.validate()?;
        self.checkpoint
            .retention()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.emergency_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.monitor_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        unique_names("emergency trigger", self.emergency.triggers.iter().map(|t| t.name.as_str()))?;
        for trigger in &self.emergency.triggers {
            trigger.validate()?;
        }
        unique_names("alert metric", self.monitor.alerts.iter().map(|a| a.metric.as_str()))?;
        for alert in &self.monitor.alerts {
            alert
                .threshold()
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self
            .monitor
            .alerts
            .iter()
            .any(|a| a.on_critical == CriticalAction::Checkpoint)
            && self.checkpoint.components.is_empty()
        {
            return Err(ConfigError::Invalid(
                "on_critical = \"checkpoint\" needs checkpoint.components".into(),
            ));
        }
        unique_names("constraint", self.constraints.iter().map(|c| c.name.as_str()))?;
        for constraint in &self.constraints {
            constraint.build()?;
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            total_timeout: Duration::from_millis(self.pipeline.total_timeout_ms),
            fail_fast: self.pipeline.fail_fast,
            parallel_execution: self.pipeline.parallel_execution,
            warnings_as_failures: self.pipeline.warnings_as_failures,
        }
    }

    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            retention: self.checkpoint.retention(),
            compression: self.checkpoint.compression,
            encryption: self.checkpoint.encryption,
        }
    }

    pub fn emergency_config(&self) -> EmergencyConfig {
        let e = &self.emergency;
        EmergencyConfig {
            response_time_bound: Duration::from_millis(e.response_time_bound_ms),
            check_interval: Duration::from_millis(e.check_interval_ms),
            graceful_timeout: Duration::from_millis(e.graceful_timeout_ms),
            forced_timeout: Duration::from_millis(e.forced_timeout_ms),
            allow_unverified_resume: e.allow_unverified_resume,
            ..EmergencyConfig::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            sample_interval: Duration::from_millis(self.monitor.sample_interval_ms),
            hysteresis: Duration::from_millis(self.monitor.hysteresis_ms),
            ..MonitorConfig::default()
        }
    }

    pub fn constraints(&self) -> Result<Vec<Constraint>, ConfigError> {
        self.constraints.iter().map(ConstraintSpec::build).collect()
    }
}

fn unique_names<'a>(what: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!("duplicate {}: {}", what, name)));
        }
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub total_timeout_ms: u64,
    pub fail_fast: bool,
    pub parallel_execution: bool,
    pub warnings_as_failures: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            total_timeout_ms: 30_000,
            fail_fast: false,
            parallel_execution: true,
            warnings_as_failures: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskSection {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub alert_threshold: f64,
    /// Highest level the risk stage lets through.
    pub max_allowed_level: RiskLevel,
    /// Replaces the default memory/cpu/operation factors when non-empty.
    pub factors: Vec<RiskFactorSpec>,
}

impl Default for RiskSection {
    fn default() -> Self {
        let thresholds = RiskThresholds::default();
        Self {
            low: thresholds.low,
            medium: thresholds.medium,
            high: thresholds.high,
            alert_threshold: thresholds.alert_threshold,
            max_allowed_level: RiskLevel::High,
            factors: Vec::new(),
        }
    }
}

impl RiskSection {
    pub fn thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            low: self.low,
            medium: self.medium,
            high: self.high,
            alert_threshold: self.alert_threshold,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.build_assessor().map(|_| ())
    }

    pub fn build_assessor(&self) -> Result<RiskAssessor, ConfigError> {
        let invalid = |e: safeguard_risk::RiskError| ConfigError::Invalid(e.to_string());
        if self.factors.is_empty() {
            return RiskAssessor::default_factors_with(self.thresholds()).map_err(invalid);
        }
        let assessor = RiskAssessor::new(self.thresholds()).map_err(invalid)?;
        for factor in &self.factors {
            assessor.add_factor(factor.build()).map_err(invalid)?;
        }
        Ok(assessor)
    }
}

/// A factor scoring `metric / ceiling`, clamped to `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskFactorSpec {
    pub name: String,
    pub weight: f64,
    pub metric: String,
    #[serde(default = "default_ceiling")]
    pub ceiling: f64,
}

fn default_ceiling() -> f64 {
    1.0
}

impl RiskFactorSpec {
    fn build(&self) -> RiskFactor {
        RiskFactor::new(
            self.name.clone(),
            self.weight,
            MetricRatioScorer::new(self.metric.clone(), self.ceiling),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointSection {
    pub max_checkpoints: usize,
    pub keep_recent: usize,
    pub daily: usize,
    pub weekly: usize,
    pub monthly: usize,
    pub compression: bool,
    pub encryption: bool,
    /// File-backed store root; checkpoints stay in memory when unset.
    pub storage_dir: Option<PathBuf>,
    pub schedule_interval_ms: Option<u64>,
    /// Components covered by scheduled and alert-triggered checkpoints.
    pub components: Vec<String>,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        let retention = RetentionPolicy::default();
        Self {
            max_checkpoints: retention.max_checkpoints,
            keep_recent: retention.keep_recent,
            daily: retention.daily,
            weekly: retention.weekly,
            monthly: retention.monthly,
            compression: false,
            encryption: false,
            storage_dir: None,
            schedule_interval_ms: None,
            components: Vec::new(),
        }
    }
}

impl CheckpointSection {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_checkpoints: self.max_checkpoints,
            keep_recent: self.keep_recent,
            daily: self.daily,
            weekly: self.weekly,
            monthly: self.monthly,
        }
    }

    pub fn schedule_interval(&self) -> Option<Duration> {
        self.schedule_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmergencySection {
    pub response_time_bound_ms: u64,
    pub check_interval_ms: u64,
    pub graceful_timeout_ms: u64,
    pub forced_timeout_ms: u64,
    pub allow_unverified_resume: bool,
    pub triggers: Vec<TriggerSpec>,
}

impl Default for EmergencySection {
    fn default() -> Self {
        let config = EmergencyConfig::default();
        Self {
            response_time_bound_ms: config.response_time_bound.as_millis() as u64,
            check_interval_ms: config.check_interval.as_millis() as u64,
            graceful_timeout_ms: config.graceful_timeout.as_millis() as u64,
            forced_timeout_ms: config.forced_timeout.as_millis() as u64,
            allow_unverified_resume: config.allow_unverified_resume,
            triggers: Vec::new(),
        }
    }
}

/// A metric trigger; exactly one of `above` and `below` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSpec {
    pub name: String,
    pub metric: String,
    pub above: Option<f64>,
    pub below: Option<f64>,
    #[serde(default)]
    pub priority: i32,
}

impl TriggerSpec {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("trigger {}: {}", self.name, msg)));
        if self.name.trim().is_empty() || self.metric.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "trigger name and metric must not be empty".into(),
            ));
        }
        match (self.above, self.below) {
            (Some(v), None) | (None, Some(v)) if v.is_finite() => Ok(()),
            (Some(_), None) | (None, Some(_)) => invalid("threshold must be finite"),
            _ => invalid("set exactly one of above or below"),
        }
    }

    /// Build the trigger over gauges fed by the metrics source.
    pub fn build(&self, gauges: &Arc<SharedGauges>) -> Result<EmergencyTrigger, ConfigError> {
        self.validate()?;
        let trigger = match (self.above, self.below) {
            (Some(threshold), None) => EmergencyTrigger::new(
                self.name.clone(),
                MetricAbove::new(gauges.clone(), self.metric.clone(), threshold),
            ),
            (None, Some(threshold)) => EmergencyTrigger::new(
                self.name.clone(),
                MetricBelow::new(gauges.clone(), self.metric.clone(), threshold),
            ),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "trigger {}: set exactly one of above or below",
                    self.name
                )))
            }
        };
        Ok(trigger.with_priority(self.priority))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    pub sample_interval_ms: u64,
    pub hysteresis_ms: u64,
    pub alerts: Vec<AlertSpec>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        let config = MonitorConfig::default();
        Self {
            sample_interval_ms: config.sample_interval.as_millis() as u64,
            hysteresis_ms: config.hysteresis.as_millis() as u64,
            alerts: Vec::new(),
        }
    }
}

/// Response to a critical alert beyond notifying sinks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalAction {
    #[default]
    None,
    EmergencyStop,
    Checkpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertSpec {
    pub metric: String,
    pub warning: f64,
    pub critical: f64,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    #[serde(default)]
    pub on_critical: CriticalAction,
}

fn default_direction() -> Direction {
    Direction::Above
}

impl AlertSpec {
    pub fn threshold(&self) -> AlertThreshold {
        AlertThreshold {
            metric: self.metric.clone(),
            warning: self.warning,
            critical: self.critical,
            direction: self.direction,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    AtMost,
    AtLeast,
    Flag,
}

/// A constraint declared in configuration.
///
/// `at_most`/`at_least` compare `metric` against `threshold`, or for dynamic
/// constraints against the context value `threshold_key` (falling back to
/// `threshold_fallback`). `flag` requires `metric` to equal `expected`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSpec {
    pub name: String,
    pub kind: ConstraintKind,
    pub metric: String,
    pub comparison: Comparison,
    pub threshold: Option<f64>,
    pub threshold_key: Option<String>,
    pub threshold_fallback: Option<f64>,
    #[serde(default = "default_expected")]
    pub expected: bool,
    pub action: Option<ViolationAction>,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_expected() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

impl ConstraintSpec {
    pub fn build(&self) -> Result<Constraint, ConfigError> {
        let constraint = match self.comparison {
            Comparison::AtMost => self.with_rule(MetricAtMost::new(self.metric.clone()))?,
            Comparison::AtLeast => self.with_rule(MetricAtLeast::new(self.metric.clone()))?,
            Comparison::Flag => Constraint::predicate(
                self.name.clone(),
                self.kind,
                FlagRequired::new(self.metric.clone(), self.expected),
            ),
        };
        let constraint = match self.action {
            Some(action) => constraint.with_action(action),
            None => constraint,
        };
        let constraint = constraint.with_priority(self.priority);
        check_constraint(&constraint)?;
        Ok(constraint)
    }

    fn with_rule(&self, rule: impl ConstraintRule + 'static) -> Result<Constraint, ConfigError> {
        let invalid = |msg: &str| ConfigError::Invalid(format!("constraint {}: {}", self.name, msg));
        match self.kind {
            ConstraintKind::Dynamic => {
                let key = self
                    .threshold_key
                    .as_ref()
                    .ok_or_else(|| invalid("dynamic constraints need threshold_key"))?;
                let mut threshold = ContextValueThreshold::new(key.clone());
                if let Some(fallback) = self.threshold_fallback {
                    threshold = threshold.with_fallback(fallback);
                }
                Ok(Constraint::dynamic(self.name.clone(), rule, threshold))
            }
            ConstraintKind::Hard | ConstraintKind::Soft => {
                if self.threshold_key.is_some() {
                    return Err(invalid("threshold_key is only valid for dynamic constraints"));
                }
                let threshold = self.threshold.ok_or_else(|| invalid("threshold is required"))?;
                Ok(match self.kind {
                    ConstraintKind::Hard => Constraint::hard(self.name.clone(), rule, threshold),
                    _ => Constraint::soft(self.name.clone(), rule, threshold),
                })
            }
        }
    }
}

/// Run the engine's registration checks without keeping the constraint.
fn check_constraint(constraint: &Constraint) -> Result<(), ConfigError> {
    safeguard_constraints::ConstraintEngine::new()
        .register(constraint.clone())
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}
