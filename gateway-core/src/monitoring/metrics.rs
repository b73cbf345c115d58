//! Prometheus metrics for the execution gateway
//!
//! Tracks order flow, venue connectivity, and the internal plumbing
//! (bus queues, tracker size, dedupe hits) rather than strategy PnL —
//! position and profitability live upstream of this process.

use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use tracing::info;

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    orders: Arc<OrderMetrics>,
    venues: Arc<VenueMetrics>,
    bus: Arc<BusMetrics>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metric families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let orders = Arc::new(OrderMetrics::new(&registry)?);
        let venues = Arc::new(VenueMetrics::new(&registry)?);
        let bus = Arc::new(BusMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            orders,
            venues,
            bus,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn orders(&self) -> &OrderMetrics {
        &self.orders
    }

    pub fn venues(&self) -> &VenueMetrics {
        &self.venues
    }

    pub fn bus(&self) -> &BusMetrics {
        &self.bus
    }
}

impl Default for MetricsRegistry {
    #[allow(clippy::panic)]
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            tracing::error!("FATAL: failed to create metrics registry: {}", e);
            panic!("cannot create metrics registry")
        })
    }
}

/// Order lifecycle metrics
pub struct OrderMetrics {
    /// Orders placed, by venue and side
    pub placed_total: IntCounterVec,
    /// Orders rejected, by venue and reason code
    pub rejected_total: IntCounterVec,
    /// Orders canceled, by venue
    pub canceled_total: IntCounterVec,
    /// Fills processed, by venue
    pub fills_total: IntCounterVec,
    /// Fills dropped as duplicates by the dedupe set
    pub fill_dedupe_hits_total: IntCounter,
    /// Order-not-found callbacks that forced a local cancel after three
    /// consecutive misses
    pub forced_cancel_total: IntCounter,
    /// Place-to-ack latency, in milliseconds
    pub place_latency_ms: Histogram,
    /// Orders currently tracked in-flight
    pub in_flight_gauge: IntGauge,
}

impl OrderMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let placed_total = IntCounterVec::new(
            Opts::new("orders_placed_total", "Total orders placed").namespace("gateway"),
            &["venue", "side"],
        )?;
        registry.register(Box::new(placed_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("orders_rejected_total", "Total orders rejected").namespace("gateway"),
            &["venue", "reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let canceled_total = IntCounterVec::new(
            Opts::new("orders_canceled_total", "Total orders canceled").namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(canceled_total.clone()))?;

        let fills_total = IntCounterVec::new(
            Opts::new("fills_total", "Total fills processed").namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(fills_total.clone()))?;

        let fill_dedupe_hits_total = IntCounter::new(
            "gateway_fill_dedupe_hits_total",
            "Fills dropped because their exec id was already seen",
        )?;
        registry.register(Box::new(fill_dedupe_hits_total.clone()))?;

        let forced_cancel_total = IntCounter::new(
            "gateway_forced_cancel_total",
            "Orders force-canceled locally after repeated not-found callbacks",
        )?;
        registry.register(Box::new(forced_cancel_total.clone()))?;

        let place_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "gateway_order_place_latency_ms",
                "Latency from place_order call to venue acknowledgement, in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
        )?;
        registry.register(Box::new(place_latency_ms.clone()))?;

        let in_flight_gauge =
            IntGauge::new("gateway_orders_in_flight", "Orders currently tracked in-flight")?;
        registry.register(Box::new(in_flight_gauge.clone()))?;

        Ok(Self {
            placed_total,
            rejected_total,
            canceled_total,
            fills_total,
            fill_dedupe_hits_total,
            forced_cancel_total,
            place_latency_ms,
            in_flight_gauge,
        })
    }
}

/// Per-venue connectivity and resilience metrics
pub struct VenueMetrics {
    /// Connection status per venue (1 = connected, 0 = disconnected)
    pub connected: IntGaugeVec,
    /// WebSocket reconnect attempts, by venue
    pub reconnects_total: IntCounterVec,
    /// Rate-limit backoff activations, by venue
    pub backoff_activations_total: IntCounterVec,
    /// HTTP 429 responses received, by venue
    pub rate_limited_total: IntCounterVec,
    /// REST request latency, by venue, in milliseconds
    pub rest_latency_ms: prometheus::HistogramVec,
}

impl VenueMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connected = IntGaugeVec::new(
            Opts::new("venue_connected", "Venue connection status").namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(connected.clone()))?;

        let reconnects_total = IntCounterVec::new(
            Opts::new("venue_reconnects_total", "Total WebSocket reconnect attempts")
                .namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(reconnects_total.clone()))?;

        let backoff_activations_total = IntCounterVec::new(
            Opts::new(
                "venue_backoff_activations_total",
                "Total rate-limit/backoff activations",
            )
            .namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(backoff_activations_total.clone()))?;

        let rate_limited_total = IntCounterVec::new(
            Opts::new("venue_rate_limited_total", "Total HTTP 429 responses received")
                .namespace("gateway"),
            &["venue"],
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let rest_latency_ms = prometheus::HistogramVec::new(
            HistogramOpts::new("venue_rest_latency_ms", "REST request latency in milliseconds")
                .namespace("gateway")
                .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
            &["venue"],
        )?;
        registry.register(Box::new(rest_latency_ms.clone()))?;

        Ok(Self {
            connected,
            reconnects_total,
            backoff_activations_total,
            rate_limited_total,
            rest_latency_ms,
        })
    }
}

/// Ingress/egress bus plumbing metrics
pub struct BusMetrics {
    /// Ingress queue depth (messages waiting to be routed to an adapter)
    pub ingress_queue_depth: IntGauge,
    /// Egress queue depth (messages waiting to be published)
    pub egress_queue_depth: IntGauge,
    /// Ingress messages dropped as duplicate client ids
    pub ingress_idempotent_drops_total: IntCounter,
    /// Malformed ingress frames discarded
    pub ingress_parse_errors_total: IntCounter,
}

impl BusMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let ingress_queue_depth = IntGauge::new(
            "gateway_ingress_queue_depth",
            "Depth of the ingress-to-router handoff queue",
        )?;
        registry.register(Box::new(ingress_queue_depth.clone()))?;

        let egress_queue_depth = IntGauge::new(
            "gateway_egress_queue_depth",
            "Depth of the adapter-to-egress handoff queue",
        )?;
        registry.register(Box::new(egress_queue_depth.clone()))?;

        let ingress_idempotent_drops_total = IntCounter::new(
            "gateway_ingress_idempotent_drops_total",
            "Ingress messages dropped as duplicate client ids",
        )?;
        registry.register(Box::new(ingress_idempotent_drops_total.clone()))?;

        let ingress_parse_errors_total = IntCounter::new(
            "gateway_ingress_parse_errors_total",
            "Malformed ingress frames discarded",
        )?;
        registry.register(Box::new(ingress_parse_errors_total.clone()))?;

        Ok(Self {
            ingress_queue_depth,
            egress_queue_depth,
            ingress_idempotent_drops_total,
            ingress_parse_errors_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_creation_registers_all_families() {
        let registry = MetricsRegistry::new().unwrap();
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn order_metrics_record() {
        let registry = MetricsRegistry::new().unwrap();
        registry.orders().placed_total.with_label_values(&["bybit", "buy"]).inc();
        registry.orders().fill_dedupe_hits_total.inc();
        registry.orders().place_latency_ms.observe(12.5);
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn venue_metrics_record() {
        let registry = MetricsRegistry::new().unwrap();
        registry.venues().connected.with_label_values(&["hyperliquid"]).set(1);
        registry.venues().reconnects_total.with_label_values(&["bybit"]).inc();
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn bus_metrics_record() {
        let registry = MetricsRegistry::new().unwrap();
        registry.bus().ingress_queue_depth.set(3);
        registry.bus().ingress_idempotent_drops_total.inc();
        assert!(!registry.registry().gather().is_empty());
    }
}
