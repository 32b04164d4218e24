//! Lightweight call/block/scan counters, exposed as Prometheus text at
//! `/metrics` (§4.10 `[AMBIENT]` HTTP status surface). Grounded in
//! `openclaw-gateway::metrics::GatewayMetrics` — atomics, no external
//! metrics crate, a hand-rolled exposition formatter.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct ServerMetrics {
    pub tool_calls_total: AtomicU64,
    pub tool_errors_total: AtomicU64,
    pub blocked_total: AtomicU64,
    pub denied_total: AtomicU64,
    pub scan_total: AtomicU64,
    pub scan_latency_ms_total: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            tool_calls_total: AtomicU64::new(0),
            tool_errors_total: AtomicU64::new(0),
            blocked_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            scan_total: AtomicU64::new(0),
            scan_latency_ms_total: AtomicU64::new(0),
        }
    }

    pub fn record_call(&self) {
        self.tool_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.tool_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self, latency_ms: u64) {
        self.scan_total.fetch_add(1, Ordering::Relaxed);
        self.scan_latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn avg_scan_latency_ms(&self) -> u64 {
        let n = self.scan_total.load(Ordering::Relaxed);
        if n == 0 {
            return 0;
        }
        self.scan_latency_ms_total.load(Ordering::Relaxed) / n
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP orchestrator_tool_calls_total Total tool calls dispatched\n");
        out.push_str("# TYPE orchestrator_tool_calls_total counter\n");
        out.push_str(&format!("orchestrator_tool_calls_total {}\n", self.tool_calls_total.load(Ordering::Relaxed)));

        out.push_str("# HELP orchestrator_tool_errors_total Total tool calls that returned isError\n");
        out.push_str("# TYPE orchestrator_tool_errors_total counter\n");
        out.push_str(&format!("orchestrator_tool_errors_total {}\n", self.tool_errors_total.load(Ordering::Relaxed)));

        out.push_str("# HELP orchestrator_blocked_total Total calls blocked by the Guardian\n");
        out.push_str("# TYPE orchestrator_blocked_total counter\n");
        out.push_str(&format!("orchestrator_blocked_total {}\n", self.blocked_total.load(Ordering::Relaxed)));

        out.push_str("# HELP orchestrator_denied_total Total calls denied by agent policy\n");
        out.push_str("# TYPE orchestrator_denied_total counter\n");
        out.push_str(&format!("orchestrator_denied_total {}\n", self.denied_total.load(Ordering::Relaxed)));

        out.push_str("# HELP orchestrator_scan_latency_ms_avg Average Guardian scan latency\n");
        out.push_str("# TYPE orchestrator_scan_latency_ms_avg gauge\n");
        out.push_str(&format!("orchestrator_scan_latency_ms_avg {}\n", self.avg_scan_latency_ms()));

        out
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_text_carries_recorded_counts() {
        let m = ServerMetrics::new();
        m.record_call();
        m.record_call();
        m.record_blocked();
        m.record_scan(100);
        m.record_scan(200);
        let text = m.to_prometheus();
        assert!(text.contains("orchestrator_tool_calls_total 2"));
        assert!(text.contains("orchestrator_blocked_total 1"));
        assert!(text.contains("orchestrator_scan_latency_ms_avg 150"));
    }

    #[test]
    fn avg_scan_latency_is_zero_with_no_samples() {
        let m = ServerMetrics::new();
        assert_eq!(m.avg_scan_latency_ms(), 0);
    }
}
