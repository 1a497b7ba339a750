//! MeteringHandler - shard supervisor and per-shard workers
//!
//! ## Design
//!
//! ```text
//! ┌──────────────────┐ spawn ┌─────────────────────┐
//! │ MeteringHandler  │──────▶│ SubMeteringHandler 0│──▶ output queue
//! │ (prototypes,     │       ├─────────────────────┤
//! │  config, queues) │──────▶│ SubMeteringHandler 1│──▶ output queue
//! └──────────────────┘       └─────────────────────┘
//! ```
//!
//! A sub-handler exclusively owns its processor copies and stashes. The only
//! state other threads touch is its [`ShardCounters`].

use super::counter::ShardCounters;
use super::stash::SlidingStash;
use super::{FLUSH_INTERVAL, MAX_FUTURE_SKEW, QUEUE_BATCH_SIZE, STATS_NAME};
use crate::app::{duplicate_processors, MeteringProcessor, UsageProcessor};
use crate::config::MeteringConfig;
use crate::datatype::{MeterPacket, PacketPool};
use crate::document::Document;
use crate::io::{system_clock, SharedClock};
use crate::observability::shard_span;
use crate::queue::{HashKey, MultiQueueReader, MultiQueueWriter, QueueError, QueueItem};
use crate::stats::{Countable, StatsHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Input side: pooled packets
pub type PacketReader = Arc<dyn MultiQueueReader<Box<MeterPacket>>>;

/// Output side: aggregated documents
pub type DocumentWriter = Arc<dyn MultiQueueWriter<Document>>;

/// Fan-out supervisor holding the shared configuration
pub struct MeteringHandler {
    processors: Vec<Box<dyn MeteringProcessor>>,
    output: DocumentWriter,
    input: PacketReader,
    config: MeteringConfig,
    pool: Arc<PacketPool>,
    stats: StatsHandle,
    clock: SharedClock,
}

/// Build a handler running the default usage processor
pub fn new_metering_map_process(
    output: DocumentWriter,
    input: PacketReader,
    config: MeteringConfig,
    pool: Arc<PacketPool>,
    stats: StatsHandle,
) -> MeteringHandler {
    MeteringHandler::new(
        vec![Box::new(UsageProcessor::new())],
        output,
        input,
        config,
        pool,
        stats,
    )
}

impl MeteringHandler {
    pub fn new(
        processors: Vec<Box<dyn MeteringProcessor>>,
        output: DocumentWriter,
        input: PacketReader,
        config: MeteringConfig,
        pool: Arc<PacketPool>,
        stats: StatsHandle,
    ) -> Self {
        MeteringHandler {
            processors,
            output,
            input,
            config,
            pool,
            stats,
            clock: system_clock(),
        }
    }

    /// Replace the wall clock used for flush timing and skew checks
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MeteringConfig {
        &self.config
    }

    /// Build the worker for input shard `index` and register its counters
    pub fn new_sub_handler(&self, index: usize) -> SubMeteringHandler {
        let processors = duplicate_processors(&self.processors);
        let names: Vec<String> = processors.iter().map(|p| p.name().to_string()).collect();
        let stashes = processors
            .iter()
            .map(|_| {
                SlidingStash::new(
                    self.config.docs_in_buffer,
                    self.config.varied_doc_limit,
                    self.config.window_size,
                    self.config.window_move_margin,
                )
            })
            .collect();

        let counters = Arc::new(ShardCounters::new(names));
        self.stats.register(
            STATS_NAME,
            counters.clone() as Arc<dyn Countable>,
            &[("index", index.to_string())],
        );

        SubMeteringHandler {
            index,
            processors,
            stashes,
            input: self.input.clone(),
            output: self.output.clone(),
            pool: self.pool.clone(),
            clock: self.clock.clone(),
            hash_key: rand::random(),
            last_flush: self.clock.now(),
            counters,
        }
    }

    /// Spawn one worker per input shard on the current tokio runtime
    pub fn start(&self) -> MeteringHandle {
        let token = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.config.input_count);
        let mut counters = Vec::with_capacity(self.config.input_count);

        for index in 0..self.config.input_count {
            let sub = self.new_sub_handler(index);
            counters.push(sub.counters());
            workers.push(tokio::spawn(sub.run(token.child_token())));
        }

        info!(
            shards = self.config.input_count,
            processors = self.processors.len(),
            docs_in_buffer = self.config.docs_in_buffer,
            varied_doc_limit = self.config.varied_doc_limit,
            window_size = self.config.window_size,
            window_move_margin = self.config.window_move_margin,
            "metering handler started"
        );

        MeteringHandle {
            token,
            workers,
            counters,
        }
    }
}

/// Handle for controlling the running workers
pub struct MeteringHandle {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    counters: Vec<Arc<ShardCounters>>,
}

impl MeteringHandle {
    /// Cancel every worker and wait for their final flush
    pub async fn shutdown(self) {
        self.token.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("metering worker ended abnormally: {}", e);
            }
        }
        info!("metering handler stopped");
    }

    /// True once every worker has exited
    pub fn closed(&self) -> bool {
        self.counters.iter().all(|c| c.is_closed())
    }

    pub fn shard_count(&self) -> usize {
        self.workers.len()
    }

    /// Counters of shard `index`
    pub fn counters(&self, index: usize) -> Option<Arc<ShardCounters>> {
        self.counters.get(index).cloned()
    }
}

/// Worker consuming one input shard
pub struct SubMeteringHandler {
    index: usize,
    processors: Vec<Box<dyn MeteringProcessor>>,
    stashes: Vec<SlidingStash>,

    input: PacketReader,
    output: DocumentWriter,
    pool: Arc<PacketPool>,
    clock: SharedClock,

    /// Round-robins output batches across partitions
    hash_key: HashKey,
    last_flush: Duration,
    counters: Arc<ShardCounters>,
}

impl SubMeteringHandler {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn counters(&self) -> Arc<ShardCounters> {
        self.counters.clone()
    }

    pub fn stash(&self, processor: usize) -> Option<&SlidingStash> {
        self.stashes.get(processor)
    }

    /// Consume the shard until cancelled or the input disconnects
    ///
    /// Exits with a final full flush and marks the counters closed.
    pub async fn run(mut self, token: CancellationToken) {
        let span = shard_span(self.index);
        async move {
            debug!("sub-handler running");
            let mut items = Vec::with_capacity(QUEUE_BATCH_SIZE);
            loop {
                let pulled = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    pulled = self.input.gets(self.index as HashKey, &mut items, QUEUE_BATCH_SIZE) => pulled,
                };
                if let Err(e) = pulled {
                    info!("input shard closed: {}", e);
                    break;
                }
                if let Err(e) = self.handle_items(&mut items).await {
                    error!("output queue failed, stopping shard: {}", e);
                    break;
                }
                if let Err(e) = self.flush_if_due().await {
                    error!("output queue failed, stopping shard: {}", e);
                    break;
                }
            }
            if let Err(e) = self.flush(None).await {
                warn!("final flush failed: {}", e);
            }
            self.counters.mark_closed();
            debug!("sub-handler stopped");
        }
        .instrument(span)
        .await
    }

    /// Process one pulled batch; every packet in it is released
    ///
    /// A tick flushes every stash. After an output failure the remaining
    /// packets are released unprocessed and the error is returned.
    pub async fn handle_items(
        &mut self,
        items: &mut Vec<QueueItem<Box<MeterPacket>>>,
    ) -> Result<(), QueueError> {
        let mut result = Ok(());
        for item in items.drain(..) {
            match item {
                QueueItem::Tick => {
                    if result.is_ok() {
                        result = self.flush(None).await;
                    }
                }
                QueueItem::Item(packet) => {
                    if result.is_ok() {
                        result = self.handle_packet(packet).await;
                    } else {
                        self.pool.release(packet);
                    }
                }
            }
        }
        result
    }

    async fn handle_packet(&mut self, packet: Box<MeterPacket>) -> Result<(), QueueError> {
        if !packet.is_classified() {
            warn!(
                timestamp = ?packet.timestamp,
                ip_src = %packet.ip_src,
                ip_dst = %packet.ip_dst,
                "drop invalid packet without policy or endpoint data"
            );
            self.counters.record_drop();
            self.pool.release(packet);
            return Ok(());
        }
        if packet.timestamp > self.clock.now() + MAX_FUTURE_SKEW {
            self.counters.record_drop();
            self.pool.release(packet);
            return Ok(());
        }

        self.counters.record_flow();
        let result = self.aggregate(&packet).await;
        self.pool.release(packet);
        result
    }

    async fn aggregate(&mut self, packet: &MeterPacket) -> Result<(), QueueError> {
        for i in 0..self.processors.len() {
            let mut docs = self.processors[i].process(packet, false);
            self.counters.record_docs(i, docs.len() as u64);
            loop {
                let (rest, rejected) = self.stashes[i].add(docs);
                self.counters.record_rejection(i, rejected);
                match rest {
                    None => break,
                    Some(rest) => {
                        self.counters.record_flush(i);
                        self.flush(Some(i)).await?;
                        docs = rest;
                    }
                }
            }
        }
        Ok(())
    }

    /// Full flush when `FLUSH_INTERVAL` passed since the last one
    pub async fn flush_if_due(&mut self) -> Result<(), QueueError> {
        if self.clock.now().saturating_sub(self.last_flush) >= FLUSH_INTERVAL {
            self.flush(None).await?;
        }
        Ok(())
    }

    /// Flush one processor's stash, or all of them with `None`
    ///
    /// Only a full flush restarts the flush interval.
    pub async fn flush(&mut self, processor: Option<usize>) -> Result<(), QueueError> {
        if processor.is_none() {
            self.last_flush = self.clock.now();
        }
        self.put_to_queue(processor).await
    }

    async fn put_to_queue(&mut self, processor: Option<usize>) -> Result<(), QueueError> {
        for i in 0..self.stashes.len() {
            if processor.is_some_and(|p| p != i) {
                continue;
            }
            let docs = self.stashes[i].drain();
            if docs.is_empty() {
                continue;
            }
            let emitted = docs.len() as u64;
            let mut docs = docs.into_iter();
            loop {
                let batch: Vec<Document> = docs.by_ref().take(QUEUE_BATCH_SIZE).collect();
                if batch.is_empty() {
                    break;
                }
                self.output.put(self.hash_key, batch).await?;
                self.hash_key = self.hash_key.wrapping_add(1);
            }
            self.counters.record_emit(i, emitted);
            debug!(
                processor = self.processors[i].name(),
                docs = emitted,
                "stash flushed"
            );
        }
        Ok(())
    }
}
