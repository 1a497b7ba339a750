//! Stats Collection
//!
//! Workers expose their counters through [`Countable`]. A [`StatsCollector`]
//! owns the registry; components receive a cloneable [`StatsHandle`] at
//! construction time and register through it. There is no process-wide
//! registry.
//!
//! ```text
//! ┌──────────────┐ register ┌──────────────┐ poll ┌───────────────┐
//! │ sub-handler  │─────────▶│ StatsHandle  │◀─────│ StatsCollector│──▶ MetricsRecorder
//! │ (Countable)  │          │  (registry)  │      │ (interval)    │
//! └──────────────┘          └──────────────┘      └───────────────┘
//! ```

use crate::observability::{collector_span, SharedMetrics};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatType {
    /// Delta since the previous poll
    Counter,
    /// Point-in-time value
    Gauge,
}

/// One polled value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatItem {
    pub name: &'static str,
    pub stat_type: StatType,
    pub value: u64,
    pub tags: Vec<(&'static str, String)>,
}

impl StatItem {
    pub fn counter(name: &'static str, value: u64) -> Self {
        StatItem {
            name,
            stat_type: StatType::Counter,
            value,
            tags: Vec::new(),
        }
    }

    pub fn gauge(name: &'static str, value: u64) -> Self {
        StatItem {
            name,
            stat_type: StatType::Gauge,
            value,
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.tags.push((key, value.into()));
        self
    }
}

/// Source of polled counters
pub trait Countable: Send + Sync + 'static {
    /// Drain counters accumulated since the previous call
    fn get_counter(&self) -> Vec<StatItem>;

    /// A closed source is polled one last time and then unregistered
    fn closed(&self) -> bool;
}

struct Registration {
    name: String,
    tags: Vec<String>,
    source: Arc<dyn Countable>,
}

/// Registration handle passed into components
#[derive(Clone, Default)]
pub struct StatsHandle {
    registry: Arc<Mutex<Vec<Registration>>>,
}

impl StatsHandle {
    /// Register a counter source under `name` with static tags
    pub fn register(&self, name: &str, source: Arc<dyn Countable>, tags: &[(&str, String)]) {
        let tags = tags.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
        self.registry.lock().push(Registration {
            name: name.to_string(),
            tags,
            source,
        });
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }
}

/// Polls registered sources and forwards their items to a recorder
pub struct StatsCollector {
    handle: StatsHandle,
    recorder: SharedMetrics,
}

impl StatsCollector {
    pub fn new(recorder: SharedMetrics) -> Self {
        StatsCollector {
            handle: StatsHandle::default(),
            recorder,
        }
    }

    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    /// Poll every source once; returns the number of items recorded
    pub fn collect_once(&self) -> usize {
        let mut recorded = 0;
        let mut registry = self.handle.registry.lock();
        registry.retain(|reg| {
            let closed = reg.source.closed();
            for item in reg.source.get_counter() {
                self.record(reg, &item);
                recorded += 1;
            }
            if closed {
                debug!(name = %reg.name, tags = ?reg.tags, "unregistering closed stats source");
            }
            !closed
        });
        recorded
    }

    fn record(&self, reg: &Registration, item: &StatItem) {
        let name = format!("{}.{}", reg.name, item.name);
        let item_tags: Vec<String> = item
            .tags
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        let tags: Vec<&str> = reg
            .tags
            .iter()
            .chain(item_tags.iter())
            .map(String::as_str)
            .collect();
        match item.stat_type {
            StatType::Counter => self.recorder.count(&name, item.value, &tags),
            StatType::Gauge => self.recorder.gauge(&name, item.value as f64, &tags),
        }
    }

    /// Poll on a fixed interval until cancelled, with a final poll on exit
    pub async fn run(self, interval: Duration, token: CancellationToken) {
        async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let recorded = self.collect_once();
                        debug!(recorded, "stats collected");
                    }
                }
            }
            self.collect_once();
        }
        .instrument(collector_span())
        .await
    }
}
