//! DogStatsD Metrics Client
//!
//! Thread-safe, non-blocking UDP metrics client for Datadog.
//! Gracefully degrades if the Datadog agent is unavailable.

use dogstatsd::{Client, Options};
use std::sync::Arc;

use super::recorder::MetricsRecorder;

/// DogStatsD connection settings
#[derive(Debug, Clone)]
pub struct StatsdConfig {
    pub statsd_addr: String,
    pub metric_prefix: String,
    pub global_tags: Vec<String>,
}

impl StatsdConfig {
    /// Read `DD_DOGSTATSD_URL`, `DD_METRIC_PREFIX` and `DD_TAGS` (k1:v1,k2:v2)
    pub fn from_env() -> Self {
        StatsdConfig {
            statsd_addr: std::env::var("DD_DOGSTATSD_URL")
                .unwrap_or_else(|_| "127.0.0.1:8125".to_string()),
            metric_prefix: std::env::var("DD_METRIC_PREFIX")
                .unwrap_or_else(|_| "metering".to_string()),
            global_tags: std::env::var("DD_TAGS")
                .map(|tags| {
                    tags.split(',')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Metrics client wrapper with graceful degradation
#[derive(Clone)]
pub struct StatsdMetrics {
    client: Arc<Option<Client>>,
    prefix: String,
    global_tags: Vec<String>,
}

impl StatsdMetrics {
    pub fn new(config: &StatsdConfig) -> Self {
        let client = match Client::new(Options {
            to_addr: config.statsd_addr.clone(),
            ..Default::default()
        }) {
            Ok(c) => {
                tracing::info!("DogStatsD client connected to {}", config.statsd_addr);
                Some(c)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to create DogStatsD client: {}. Metrics disabled.",
                    e
                );
                None
            }
        };

        StatsdMetrics {
            client: Arc::new(client),
            prefix: config.metric_prefix.clone(),
            global_tags: config.global_tags.clone(),
        }
    }

    fn merge_tags(&self, tags: &[&str]) -> Vec<String> {
        self.global_tags
            .iter()
            .cloned()
            .chain(tags.iter().map(|s| s.to_string()))
            .collect()
    }
}

impl MetricsRecorder for StatsdMetrics {
    fn count(&self, name: &str, value: u64, tags: &[&str]) {
        if let Some(ref client) = *self.client {
            let metric_name = format!("{}.{}", self.prefix, name);
            let value = i64::try_from(value).unwrap_or(i64::MAX);
            let _ = client.count(&metric_name, value, self.merge_tags(tags));
        }
    }

    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        if let Some(ref client) = *self.client {
            let metric_name = format!("{}.{}", self.prefix, name);
            let _ = client.gauge(&metric_name, value.to_string(), self.merge_tags(tags));
        }
    }
}
