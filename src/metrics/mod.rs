//! Metrics and observability module
//!
//! Prometheus-compatible metrics for the channel and the sender.
//!
//! Key metrics exposed:
//! - Slot outcomes (empty, idle, clean, collision, departures)
//! - Broadcast frames and bytes, discarded transmissions
//! - Sender deliveries, retransmissions and backoff lengths
//! - Transfer completions, failures and durations

pub mod exporter;
pub mod recorder;

pub use exporter::{start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::init_metrics;
