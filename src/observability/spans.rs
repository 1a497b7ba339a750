//! Span Helpers
//!
//! Spans wrap whole worker futures via `tracing::Instrument`; nothing is
//! entered per packet.

use tracing::{span, Level, Span};

/// Create a span for one sub-handler worker
#[inline]
pub fn shard_span(shard_id: usize) -> Span {
    span!(Level::INFO, "metering.shard", shard.id = shard_id)
}

/// Create a span for the stats collector loop
#[inline]
pub fn collector_span() -> Span {
    span!(Level::DEBUG, "metering.stats_collector")
}
