//! Observability Module
//!
//! - Structured logging via `tracing` with environment-based filtering
//! - Span helpers for shard workers and the stats collector
//! - [`MetricsRecorder`] sinks that receive polled counters:
//!   [`NoopMetrics`], [`SimulatedMetrics`] for tests, and a DogStatsD client
//!   behind the `datadog` feature
//!
//! # Usage
//!
//! ```rust,ignore
//! use metering_mapper::observability::{init_tracing, noop_metrics};
//!
//! init_tracing(false).expect("Failed to initialize tracing");
//! let recorder = noop_metrics();
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `info` | Log filter directives |
//! | `DD_DOGSTATSD_URL` | `127.0.0.1:8125` | DogStatsD address (`datadog` feature) |
//! | `DD_METRIC_PREFIX` | `metering` | Metric name prefix (`datadog` feature) |

pub mod recorder;
pub mod spans;
pub mod tracing_setup;

#[cfg(feature = "datadog")]
pub mod statsd;

pub use recorder::{
    noop_metrics, simulated_metrics, MetricType, MetricsRecorder, NoopMetrics, RecordedMetric,
    SharedMetrics, SimulatedMetrics,
};
pub use spans::*;
pub use tracing_setup::init as init_tracing;

#[cfg(feature = "datadog")]
pub use statsd::{StatsdConfig, StatsdMetrics};
