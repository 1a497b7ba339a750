//! Metering mapper
//!
//! Consumes classified per-packet measurements from a sharded input queue,
//! turns each one into metering documents through pluggable processors,
//! merges documents with identical (time window, tag) keys in a bounded
//! sliding-window stash, and emits the aggregates in batches to a
//! partitioned output queue.

pub mod app;
pub mod config;
pub mod datatype;
pub mod document;
pub mod io;
pub mod mapreduce;
pub mod observability;
pub mod queue;
pub mod stats;

pub use app::{MeteringProcessor, UsageProcessor};
pub use config::{ConfigError, MeteringConfig};
pub use datatype::{MeterPacket, PacketPool};
pub use document::{Document, Meter, Tag, TagValue};
pub use mapreduce::{
    new_metering_map_process, MeteringHandle, MeteringHandler, SlidingStash, SubMeteringHandler,
};
pub use queue::{multi_queue, MultiQueueReader, MultiQueueWriter, QueueItem};
pub use stats::{StatsCollector, StatsHandle};
