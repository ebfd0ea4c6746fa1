// Metrics and monitoring

use prometheus::{Counter, Histogram, Registry};
use std::sync::Arc;

/// Relayer metrics
pub struct RelayerMetrics {
    // Packet metrics
    pub packets_relayed: Counter,
    pub packets_failed: Counter,
    pub packet_relay_duration: Histogram,

    // Relay-loop metrics
    pub tunnel_check_failures: Counter,

    registry: Arc<Registry>,
}

impl RelayerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let packets_relayed =
            Counter::new("tunnel_packets_relayed_total", "Total packets relayed")?;
        let packets_failed = Counter::new(
            "tunnel_packets_failed_total",
            "Total packets that failed to relay",
        )?;
        let packet_relay_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "tunnel_packet_relay_duration_seconds",
            "Time to relay a packet",
        ))?;
        let tunnel_check_failures = Counter::new(
            "tunnel_check_failures_total",
            "Total failed tunnel polling iterations",
        )?;

        registry.register(Box::new(packets_relayed.clone()))?;
        registry.register(Box::new(packets_failed.clone()))?;
        registry.register(Box::new(packet_relay_duration.clone()))?;
        registry.register(Box::new(tunnel_check_failures.clone()))?;

        Ok(Self {
            packets_relayed,
            packets_failed,
            packet_relay_duration,
            tunnel_check_failures,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_gather() {
        let metrics = RelayerMetrics::new().unwrap();

        metrics.packets_relayed.inc();
        metrics.packets_failed.inc();
        metrics.tunnel_check_failures.inc();
        metrics.packet_relay_duration.observe(0.25);

        let families = metrics.registry().gather();
        assert_eq!(families.len(), 4);
    }
}
