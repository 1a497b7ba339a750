//! Metering aggregation core
//!
//! ```text
//! input shard ─▶ SubMeteringHandler ─▶ processor ─▶ SlidingStash ─▶ output queue
//!                 (one per shard)       (one copy per shard)  (one per processor)
//! ```
//!
//! Each shard runs independently: the same tag seen on two shards is
//! aggregated twice and emitted as two documents.

mod counter;
mod handler;
mod stash;

pub use counter::{
    fill_stat_items, CounterPair, CounterSlot, CounterSnapshot, HandlerCounter, HandlerStats,
    ProcessorCounter, ProcessorStats, ShardCounters,
};
pub use handler::{
    new_metering_map_process, DocumentWriter, MeteringHandle, MeteringHandler, PacketReader,
    SubMeteringHandler,
};
pub use stash::SlidingStash;

use std::time::Duration;

/// Maximum elements per queue read and per output put
pub const QUEUE_BATCH_SIZE: usize = 4096;

/// Longest a stash may hold documents without a full flush
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Packets stamped further than this in the future are dropped
pub const MAX_FUTURE_SKEW: Duration = Duration::from_secs(60);

/// Name the sub-handlers register their counters under
pub const STATS_NAME: &str = "metering-mapper";
