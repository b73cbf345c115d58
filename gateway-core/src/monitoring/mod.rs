//! Monitoring and observability module (C15).
//!
//! A Prometheus registry tracking order flow, venue connectivity, and bus
//! plumbing, served over the one async pocket in an otherwise
//! thread-per-component process (§5).

pub mod metrics;
pub mod server;

pub use metrics::{BusMetrics, MetricsRegistry, OrderMetrics, VenueMetrics};
pub use server::{MetricsServer, MetricsServerConfig};
