use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use air_config::KillSwitchConfig;
use air_core::{AgentId, AirError, MetricName, PolicyId, Result};

use crate::store::PolicyStore;

/// How many report ids each policy remembers for de-duplication.
const SEEN_REPORTS: usize = 1024;

/// A threshold on a reported metric that stops an agent once reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitch {
    /// Metric name this switch watches, e.g. `spend_usd` or `error_count`.
    pub switch_type: MetricName,
    #[serde(default)]
    pub limit_type: LimitType,
    pub threshold: f64,
    #[serde(default)]
    pub action: SwitchAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Window for `rate` switches. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    /// Cumulative total since the policy was stored.
    #[default]
    Absolute,
    /// Sum over a sliding time window.
    Rate,
}

/// What happens once a switch trips. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchAction {
    Log,
    Deny,
    #[default]
    Halt,
}

/// Timing knobs for switch evaluation, taken from `[kill_switch]`.
#[derive(Debug, Clone, Copy)]
pub struct SwitchSettings {
    pub lock_timeout: Duration,
    pub default_window: Duration,
}

impl From<&KillSwitchConfig> for SwitchSettings {
    fn from(config: &KillSwitchConfig) -> Self {
        Self {
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            default_window: Duration::from_secs(config.default_window_secs),
        }
    }
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self::from(&KillSwitchConfig::default())
    }
}

// ── Per-policy state ───────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct SwitchState {
    total: f64,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    tripped_at: Option<DateTime<Utc>>,
}

impl SwitchState {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let Some(horizon) = ChronoDuration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
        else {
            return;
        };
        while self.samples.front().is_some_and(|(at, _)| *at <= horizon) {
            self.samples.pop_front();
        }
    }

    fn window_sum(&self) -> f64 {
        self.samples.iter().map(|(_, v)| v).sum()
    }
}

#[derive(Debug, Default)]
struct BankState {
    switches: Vec<SwitchState>,
    seen: VecDeque<String>,
    seen_set: HashSet<String>,
}

impl BankState {
    /// Returns false if the report id was already applied.
    fn remember(&mut self, report_id: &str) -> bool {
        if !self.seen_set.insert(report_id.to_string()) {
            return false;
        }
        self.seen.push_back(report_id.to_string());
        if self.seen.len() > SEEN_REPORTS {
            if let Some(old) = self.seen.pop_front() {
                self.seen_set.remove(&old);
            }
        }
        true
    }
}

/// Mutable counters for one policy's kill switches. Lives next to the policy
/// in its record and is discarded when the policy is replaced.
#[derive(Debug)]
pub struct SwitchBank {
    state: Mutex<BankState>,
}

/// Outcome of a non-blocking trip check.
#[derive(Debug, Clone, PartialEq)]
pub enum TripCheck {
    Clear,
    Tripped { action: SwitchAction, reason: String },
    /// State couldn't be read in time.
    Unavailable,
}

/// A switch that tripped while applying a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchTrip {
    pub policy_id: PolicyId,
    pub switch_type: MetricName,
    pub threshold: f64,
    pub observed: f64,
    pub action: SwitchAction,
}

/// Point-in-time view of one switch, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchStatus {
    pub switch_type: MetricName,
    pub limit_type: LimitType,
    pub threshold: f64,
    pub action: SwitchAction,
    pub enabled: bool,
    /// Cumulative for absolute switches, windowed sum for rate switches.
    pub observed: f64,
    pub tripped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tripped_at: Option<DateTime<Utc>>,
}

impl SwitchBank {
    pub fn new(switches: &[KillSwitch]) -> Self {
        Self {
            state: Mutex::new(BankState {
                switches: vec![SwitchState::default(); switches.len()],
                ..Default::default()
            }),
        }
    }

    /// Apply a batch of metric deltas atomically. Returns `None` if the
    /// report id was seen before.
    pub fn apply(
        &self,
        policy_id: &str,
        switches: &[KillSwitch],
        report_id: Option<&str>,
        metrics: &BTreeMap<MetricName, f64>,
        now: DateTime<Utc>,
        settings: SwitchSettings,
    ) -> Option<Vec<SwitchTrip>> {
        let mut state = self.state.lock();
        if let Some(id) = report_id {
            if !state.remember(id) {
                debug!(policy = policy_id, report_id = id, "duplicate metrics report ignored");
                return None;
            }
        }

        let mut trips = Vec::new();
        for (switch, slot) in switches.iter().zip(state.switches.iter_mut()) {
            if !switch.enabled {
                continue;
            }
            let Some(delta) = metrics.get(&switch.switch_type).copied() else {
                continue;
            };

            slot.total += delta;
            let observed = match switch.limit_type {
                LimitType::Absolute => slot.total,
                LimitType::Rate => {
                    slot.samples.push_back((now, delta));
                    slot.prune(now, window_of(switch, settings));
                    slot.window_sum()
                }
            };

            if slot.tripped_at.is_none() && observed >= switch.threshold {
                slot.tripped_at = Some(now);
                warn!(
                    policy = policy_id,
                    switch = %switch.switch_type,
                    observed,
                    threshold = switch.threshold,
                    action = ?switch.action,
                    "kill switch tripped"
                );
                trips.push(SwitchTrip {
                    policy_id: policy_id.to_string(),
                    switch_type: switch.switch_type.clone(),
                    threshold: switch.threshold,
                    observed,
                    action: switch.action,
                });
            }
        }
        Some(trips)
    }

    /// The most severe tripped switch, without blocking past `timeout`.
    /// This parks the calling thread, including an async worker, for up to
    /// `timeout` when the bank is contended.
    pub fn check(&self, switches: &[KillSwitch], timeout: Duration) -> TripCheck {
        let Some(state) = self.state.try_lock_for(timeout) else {
            return TripCheck::Unavailable;
        };
        switches
            .iter()
            .zip(state.switches.iter())
            .filter(|(switch, slot)| switch.enabled && slot.tripped_at.is_some())
            .max_by_key(|(switch, _)| switch.action)
            .map(|(switch, _)| TripCheck::Tripped {
                action: switch.action,
                reason: format!(
                    "kill switch '{}' tripped (threshold {})",
                    switch.switch_type, switch.threshold
                ),
            })
            .unwrap_or(TripCheck::Clear)
    }

    pub fn status(
        &self,
        switches: &[KillSwitch],
        now: DateTime<Utc>,
        settings: SwitchSettings,
    ) -> Vec<SwitchStatus> {
        let mut state = self.state.lock();
        switches
            .iter()
            .zip(state.switches.iter_mut())
            .map(|(switch, slot)| {
                let observed = match switch.limit_type {
                    LimitType::Absolute => slot.total,
                    LimitType::Rate => {
                        slot.prune(now, window_of(switch, settings));
                        slot.window_sum()
                    }
                };
                SwitchStatus {
                    switch_type: switch.switch_type.clone(),
                    limit_type: switch.limit_type,
                    threshold: switch.threshold,
                    action: switch.action,
                    enabled: switch.enabled,
                    observed,
                    tripped: slot.tripped_at.is_some(),
                    tripped_at: slot.tripped_at,
                }
            })
            .collect()
    }
}

fn window_of(switch: &KillSwitch, settings: SwitchSettings) -> Duration {
    switch
        .window_secs
        .map(Duration::from_secs)
        .unwrap_or(settings.default_window)
}

// ── Reports ────────────────────────────────────────────────────

/// Body of a metrics report: an agent id, an optional idempotency key, and
/// any number of `metric: number` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl MetricsReport {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            report_id: None,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: &str, value: f64) -> Self {
        self.values.insert(metric.to_string(), Value::from(value));
        self
    }

    pub fn with_report_id(mut self, id: impl Into<String>) -> Self {
        self.report_id = Some(id.into());
        self
    }

    /// Finite numeric entries. Anything else is not a metric.
    pub fn metrics(&self) -> BTreeMap<MetricName, f64> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_f64().filter(|n| n.is_finite()).map(|n| (k.clone(), n)))
            .collect()
    }
}

/// What happened to a metrics report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    pub agent_id: AgentId,
    /// Metric names that were applied.
    pub accepted: Vec<MetricName>,
    /// Policies that had already seen this report id.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub duplicate_for: Vec<PolicyId>,
    pub tripped: Vec<SwitchTrip>,
}

// ── Tracker ────────────────────────────────────────────────────

/// Routes metric reports to the switch banks of every policy that applies
/// to the reporting agent.
#[derive(Clone)]
pub struct KillSwitchTracker {
    store: Arc<dyn PolicyStore>,
    settings: SwitchSettings,
}

impl KillSwitchTracker {
    pub fn new(store: Arc<dyn PolicyStore>, settings: SwitchSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> SwitchSettings {
        self.settings
    }

    /// Record a single metric delta for an agent.
    pub fn ingest_metrics(&self, agent_id: &str, metric: &str, value: f64) -> Vec<SwitchTrip> {
        self.ingest_report(&MetricsReport::new(agent_id).with(metric, value))
            .tripped
    }

    /// Apply a report to every applicable policy. A report is applied to a
    /// policy all at once or not at all.
    pub fn ingest_report(&self, report: &MetricsReport) -> IngestSummary {
        let metrics = report.metrics();
        let now = Utc::now();
        let mut summary = IngestSummary {
            agent_id: report.agent_id.clone(),
            accepted: metrics.keys().cloned().collect(),
            ..Default::default()
        };

        for record in self.store.applicable(&report.agent_id) {
            let policy = &record.policy;
            if policy.kill_switches.is_empty() {
                continue;
            }
            match record.switches.apply(
                &policy.id,
                &policy.kill_switches,
                report.report_id.as_deref(),
                &metrics,
                now,
                self.settings,
            ) {
                Some(trips) => summary.tripped.extend(trips),
                None => summary.duplicate_for.push(policy.id.clone()),
            }
        }
        summary
    }

    /// Whether any enabled switch of the policy has tripped. Unreadable state
    /// counts as tripped.
    pub fn is_tripped(&self, policy_id: &str) -> Result<bool> {
        let record = self
            .store
            .get(policy_id)
            .ok_or_else(|| AirError::not_found("policy", policy_id))?;
        Ok(!matches!(
            record
                .switches
                .check(&record.policy.kill_switches, self.settings.lock_timeout),
            TripCheck::Clear
        ))
    }

    pub fn status(&self, policy_id: &str) -> Result<Vec<SwitchStatus>> {
        let record = self
            .store
            .get(policy_id)
            .ok_or_else(|| AirError::not_found("policy", policy_id))?;
        Ok(record
            .switches
            .status(&record.policy.kill_switches, Utc::now(), self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch(metric: &str, limit: LimitType, threshold: f64, action: SwitchAction) -> KillSwitch {
        KillSwitch {
            switch_type: metric.into(),
            limit_type: limit,
            threshold,
            action,
            enabled: true,
            window_secs: None,
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<MetricName, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_absolute_trips_at_threshold() {
        let switches = vec![switch("spend_usd", LimitType::Absolute, 10.0, SwitchAction::Halt)];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        let now = Utc::now();

        let trips = bank
            .apply("p", &switches, None, &metrics(&[("spend_usd", 4.0)]), now, s)
            .unwrap();
        assert!(trips.is_empty());
        assert_eq!(bank.check(&switches, s.lock_timeout), TripCheck::Clear);

        let trips = bank
            .apply("p", &switches, None, &metrics(&[("spend_usd", 6.0)]), now, s)
            .unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].observed, 10.0);
        assert!(matches!(
            bank.check(&switches, s.lock_timeout),
            TripCheck::Tripped { action: SwitchAction::Halt, .. }
        ));
    }

    #[test]
    fn test_trip_is_sticky_and_reported_once() {
        let switches = vec![switch("errors", LimitType::Absolute, 1.0, SwitchAction::Deny)];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        let now = Utc::now();
        let first = bank
            .apply("p", &switches, None, &metrics(&[("errors", 1.0)]), now, s)
            .unwrap();
        let second = bank
            .apply("p", &switches, None, &metrics(&[("errors", 1.0)]), now, s)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(bank.status(&switches, now, s)[0].tripped);
    }

    #[test]
    fn test_rate_window_expires_samples() {
        let mut rate = switch("calls", LimitType::Rate, 5.0, SwitchAction::Halt);
        rate.window_secs = Some(10);
        let switches = vec![rate];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        let t0 = Utc::now();

        bank.apply("p", &switches, None, &metrics(&[("calls", 3.0)]), t0, s);
        let later = t0 + ChronoDuration::seconds(11);
        let trips = bank
            .apply("p", &switches, None, &metrics(&[("calls", 3.0)]), later, s)
            .unwrap();
        assert!(trips.is_empty());
        assert_eq!(bank.status(&switches, later, s)[0].observed, 3.0);

        let trips = bank
            .apply("p", &switches, None, &metrics(&[("calls", 2.0)]), later, s)
            .unwrap();
        assert_eq!(trips.len(), 1);
    }

    #[test]
    fn test_duplicate_report_id_is_ignored() {
        let switches = vec![switch("spend_usd", LimitType::Absolute, 10.0, SwitchAction::Halt)];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        let now = Utc::now();
        let m = metrics(&[("spend_usd", 6.0)]);
        assert!(bank.apply("p", &switches, Some("r1"), &m, now, s).is_some());
        assert!(bank.apply("p", &switches, Some("r1"), &m, now, s).is_none());
        assert_eq!(bank.status(&switches, now, s)[0].observed, 6.0);
    }

    #[test]
    fn test_disabled_switch_never_trips() {
        let mut off = switch("spend_usd", LimitType::Absolute, 1.0, SwitchAction::Halt);
        off.enabled = false;
        let switches = vec![off];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        bank.apply("p", &switches, None, &metrics(&[("spend_usd", 5.0)]), Utc::now(), s);
        assert_eq!(bank.check(&switches, s.lock_timeout), TripCheck::Clear);
    }

    #[test]
    fn test_most_severe_action_wins() {
        let switches = vec![
            switch("a", LimitType::Absolute, 1.0, SwitchAction::Log),
            switch("b", LimitType::Absolute, 1.0, SwitchAction::Deny),
        ];
        let bank = SwitchBank::new(&switches);
        let s = SwitchSettings::default();
        bank.apply("p", &switches, None, &metrics(&[("a", 1.0), ("b", 1.0)]), Utc::now(), s);
        assert!(matches!(
            bank.check(&switches, s.lock_timeout),
            TripCheck::Tripped { action: SwitchAction::Deny, .. }
        ));
    }

    #[test]
    fn test_check_fails_closed_when_locked() {
        let switches = vec![switch("a", LimitType::Absolute, 1.0, SwitchAction::Log)];
        let bank = SwitchBank::new(&switches);
        let _guard = bank.state.lock();
        assert_eq!(
            bank.check(&switches, Duration::from_millis(5)),
            TripCheck::Unavailable
        );
    }

    #[test]
    fn test_report_metrics_filters_non_numeric() {
        let report: MetricsReport = serde_json::from_value(serde_json::json!({
            "agent_id": "a1",
            "report_id": "r-9",
            "spend_usd": 2.5,
            "note": "hello",
            "errors": 1
        }))
        .unwrap();
        assert_eq!(report.report_id.as_deref(), Some("r-9"));
        assert_eq!(report.metrics(), metrics(&[("errors", 1.0), ("spend_usd", 2.5)]));
    }

    #[test]
    fn test_switch_defaults() {
        let ks: KillSwitch = serde_json::from_value(serde_json::json!({
            "switch_type": "spend_usd",
            "threshold": 3.0
        }))
        .unwrap();
        assert_eq!(ks.limit_type, LimitType::Absolute);
        assert_eq!(ks.action, SwitchAction::Halt);
        assert!(ks.enabled);
        assert!(ks.window_secs.is_none());
    }
}
