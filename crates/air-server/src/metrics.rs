//! Prometheus-compatible metrics for the policy engine.
//!
//! Tracks request counts, decisions by outcome, metric reports, and kill switch trips.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use air_policy::{DecisionAction, TrustSource};

/// Global metrics registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total HTTP requests served.
    http_requests_total: AtomicU64,
    /// Total HTTP errors (4xx + 5xx).
    http_errors_total: AtomicU64,
    /// Decisions by outcome, indexed by `DecisionAction` order.
    decisions_total: [AtomicU64; 5],
    /// Total metric reports received.
    metric_reports_total: AtomicU64,
    /// Reports skipped as duplicates, counted per policy.
    duplicate_reports_total: AtomicU64,
    /// Total kill switch trips.
    kill_switch_trips_total: AtomicU64,
    /// Trust lookups answered with the neutral fallback.
    trust_fallbacks_total: AtomicU64,
    started_at: Instant,
}

const ACTIONS: [DecisionAction; 5] = [
    DecisionAction::Allow,
    DecisionAction::Log,
    DecisionAction::Pending,
    DecisionAction::Deny,
    DecisionAction::Halt,
];

fn slot(action: DecisionAction) -> usize {
    match action {
        DecisionAction::Allow => 0,
        DecisionAction::Log => 1,
        DecisionAction::Pending => 2,
        DecisionAction::Deny => 3,
        DecisionAction::Halt => 4,
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                decisions_total: Default::default(),
                metric_reports_total: AtomicU64::new(0),
                duplicate_reports_total: AtomicU64::new(0),
                kill_switch_trips_total: AtomicU64::new(0),
                trust_fallbacks_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, action: DecisionAction) {
        self.inner.decisions_total[slot(action)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, duplicates: usize, trips: usize) {
        let m = &self.inner;
        m.metric_reports_total.fetch_add(1, Ordering::Relaxed);
        m.duplicate_reports_total
            .fetch_add(duplicates as u64, Ordering::Relaxed);
        m.kill_switch_trips_total
            .fetch_add(trips as u64, Ordering::Relaxed);
    }

    pub fn record_trust(&self, source: TrustSource) {
        if source == TrustSource::Neutral {
            self.inner
                .trust_fallbacks_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Render metrics in Prometheus text exposition format. `policies` is the
    /// current size of the policy table.
    pub fn render_prometheus(&self, policies: usize) -> String {
        let m = &self.inner;
        let uptime = m.started_at.elapsed().as_secs();

        let mut decisions = String::new();
        for action in ACTIONS {
            decisions.push_str(&format!(
                "air_decisions_total{{action=\"{}\"}} {}\n",
                action,
                m.decisions_total[slot(action)].load(Ordering::Relaxed)
            ));
        }

        format!(
            r#"# HELP air_uptime_seconds Time since the server started.
# TYPE air_uptime_seconds gauge
air_uptime_seconds {}

# HELP air_policies Policies currently stored.
# TYPE air_policies gauge
air_policies {}

# HELP air_http_requests_total Total HTTP requests served.
# TYPE air_http_requests_total counter
air_http_requests_total {}

# HELP air_http_errors_total Total HTTP errors (4xx/5xx).
# TYPE air_http_errors_total counter
air_http_errors_total {}

# HELP air_decisions_total Evaluation decisions by outcome.
# TYPE air_decisions_total counter
{}
# HELP air_metric_reports_total Total metric reports received.
# TYPE air_metric_reports_total counter
air_metric_reports_total {}

# HELP air_duplicate_reports_total Reports ignored because their report_id was already applied.
# TYPE air_duplicate_reports_total counter
air_duplicate_reports_total {}

# HELP air_kill_switch_trips_total Total kill switch trips.
# TYPE air_kill_switch_trips_total counter
air_kill_switch_trips_total {}

# HELP air_trust_fallbacks_total Trust lookups that fell back to the neutral score.
# TYPE air_trust_fallbacks_total counter
air_trust_fallbacks_total {}
"#,
            uptime,
            policies,
            m.http_requests_total.load(Ordering::Relaxed),
            m.http_errors_total.load(Ordering::Relaxed),
            decisions,
            m.metric_reports_total.load(Ordering::Relaxed),
            m.duplicate_reports_total.load(Ordering::Relaxed),
            m.kill_switch_trips_total.load(Ordering::Relaxed),
            m.trust_fallbacks_total.load(Ordering::Relaxed),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counter_increments() {
        let m = Metrics::new();
        m.inc_http_requests();
        m.inc_http_requests();
        m.inc_http_errors();
        let output = m.render_prometheus(0);
        assert!(output.contains("air_http_requests_total 2"));
        assert!(output.contains("air_http_errors_total 1"));
    }

    #[test]
    fn test_metrics_decisions_by_action() {
        let m = Metrics::new();
        m.record_decision(DecisionAction::Deny);
        m.record_decision(DecisionAction::Deny);
        m.record_decision(DecisionAction::Halt);
        let output = m.render_prometheus(3);
        assert!(output.contains("air_decisions_total{action=\"deny\"} 2"));
        assert!(output.contains("air_decisions_total{action=\"halt\"} 1"));
        assert!(output.contains("air_decisions_total{action=\"allow\"} 0"));
        assert!(output.contains("air_policies 3"));
    }

    #[test]
    fn test_metrics_reports_and_trips() {
        let m = Metrics::new();
        m.record_report(0, 2);
        m.record_report(1, 0);
        m.record_trust(TrustSource::Neutral);
        m.record_trust(TrustSource::Ledger);
        let output = m.render_prometheus(0);
        assert!(output.contains("air_metric_reports_total 2"));
        assert!(output.contains("air_duplicate_reports_total 1"));
        assert!(output.contains("air_kill_switch_trips_total 2"));
        assert!(output.contains("air_trust_fallbacks_total 1"));
    }

    #[test]
    fn test_metrics_prometheus_format() {
        let m = Metrics::new();
        let output = m.render_prometheus(0);
        assert!(output.contains("# HELP air_uptime_seconds"));
        assert!(output.contains("# TYPE air_uptime_seconds gauge"));
        assert!(output.contains("# TYPE air_decisions_total counter"));
    }
}
