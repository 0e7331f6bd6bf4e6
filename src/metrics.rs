//! Traffic and connection counters
//!
//! Counters sit on the hot path of every relayed byte, so they are plain
//! Prometheus atomics behind an instance-owned registry. The snapshot is
//! for observability, not accounting: it is not a consistent cut across
//! counters and consumers must tolerate small skew.

use std::time::{Duration, Instant};

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::router::Mode;

/// Traffic and connection statistics for the process lifetime.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    bytes_total: IntCounterVec,
    connections_active: IntGauge,
    connections_total: IntCounter,
    uptime_seconds: IntGauge,
    start: Instant,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone)]
pub struct Stats {
    pub bytes_direct: u64,
    pub bytes_warp: u64,
    pub bytes_home: u64,
    pub active_connections: i64,
    pub total_connections: u64,
    pub uptime: Duration,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let bytes_total = IntCounterVec::new(
            Opts::new("switch_gate_bytes_total", "Total bytes transferred"),
            &["mode"],
        )
        .unwrap();
        let connections_active = IntGauge::new(
            "switch_gate_connections_active",
            "Active connections",
        )
        .unwrap();
        let connections_total = IntCounter::new(
            "switch_gate_connections_total",
            "Total connections",
        )
        .unwrap();
        let uptime_seconds = IntGauge::new(
            "switch_gate_uptime_seconds",
            "Uptime in seconds",
        )
        .unwrap();

        registry.register(Box::new(bytes_total.clone())).ok();
        registry.register(Box::new(connections_active.clone())).ok();
        registry.register(Box::new(connections_total.clone())).ok();
        registry.register(Box::new(uptime_seconds.clone())).ok();

        // Pre-initialize mode labels so they appear in the exposition
        for mode in Mode::ALL {
            bytes_total.with_label_values(&[mode.as_str()]).inc_by(0);
        }

        Self {
            registry,
            bytes_total,
            connections_active,
            connections_total,
            uptime_seconds,
            start: Instant::now(),
        }
    }

    /// Add bytes to a mode counter. Zero counts and unknown tags are
    /// no-ops; the tag set is static.
    pub fn add_bytes(&self, mode: &str, n: u64) {
        if n == 0 {
            return;
        }
        match mode {
            "direct" | "warp" | "home" => {
                self.bytes_total.with_label_values(&[mode]).inc_by(n)
            }
            _ => {}
        }
    }

    /// Bytes transferred through a mode. Unknown tags read as 0.
    pub fn get_bytes(&self, mode: &str) -> u64 {
        match mode {
            "direct" | "warp" | "home" => {
                self.bytes_total.with_label_values(&[mode]).get()
            }
            _ => 0,
        }
    }

    pub fn conn_opened(&self) {
        self.connections_active.inc();
        self.connections_total.inc();
    }

    pub fn conn_closed(&self) {
        self.connections_active.dec();
    }

    pub fn active_connections(&self) -> i64 {
        self.connections_active.get()
    }

    pub fn uptime(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            bytes_direct: self.get_bytes("direct"),
            bytes_warp: self.get_bytes("warp"),
            bytes_home: self.get_bytes("home"),
            active_connections: self.connections_active.get(),
            total_connections: self.connections_total.get(),
            uptime: self.uptime(),
        }
    }

    /// Prometheus text exposition of all counters.
    pub fn render(&self) -> String {
        self.uptime_seconds.set(self.uptime().as_secs() as i64);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
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
    fn test_add_and_get_bytes() {
        let m = Metrics::new();
        m.add_bytes("direct", 100);
        m.add_bytes("direct", 28);
        assert_eq!(m.get_bytes("direct"), 128);
        assert_eq!(m.get_bytes("warp"), 0);
        assert_eq!(m.get_bytes("home"), 0);
    }

    #[test]
    fn test_unknown_mode_is_noop() {
        let m = Metrics::new();
        m.add_bytes("bogus", 42);
        assert_eq!(m.get_bytes("bogus"), 0);
        assert_eq!(m.snapshot().bytes_direct, 0);
    }

    #[test]
    fn test_zero_bytes_is_noop() {
        let m = Metrics::new();
        m.add_bytes("home", 0);
        assert_eq!(m.get_bytes("home"), 0);
    }

    #[test]
    fn test_connection_counters() {
        let m = Metrics::new();
        m.conn_opened();
        m.conn_opened();
        assert_eq!(m.active_connections(), 2);
        m.conn_closed();
        let stats = m.snapshot();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_connections, 2);
    }

    #[test]
    fn test_render_contains_metric_names() {
        let m = Metrics::new();
        m.add_bytes("warp", 7);
        let text = m.render();
        assert!(text.contains("switch_gate_bytes_total{mode=\"warp\"} 7"));
        assert!(text.contains("switch_gate_connections_active"));
        assert!(text.contains("switch_gate_connections_total"));
        assert!(text.contains("switch_gate_uptime_seconds"));
    }
}
