//! Double-buffered shard counters
//!
//! Two [`CounterSlot`]s and a latch. The worker always writes the slot the
//! latch points at; the stats collector flips the latch and drains the slot
//! that just retired.
//!
//! Every field is an atomic and draining uses `swap(0)`, so a writer that
//! loaded the latch just before a flip and still lands in the retired slot is
//! never torn and never lost: its increment is reported by the next drain of
//! that slot.

use crate::stats::{Countable, StatItem};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct HandlerCounter {
    pub flow: AtomicU64,
    pub drop: AtomicU64,
}

#[derive(Debug, Default)]
pub struct ProcessorCounter {
    /// Documents emitted by the processor
    pub doc: AtomicU64,
    /// Largest number of documents from a single packet
    pub max: AtomicU64,
    pub rejection: AtomicU64,
    /// Documents flushed to the output queue
    pub emit: AtomicU64,
    /// Overflow-triggered flushes
    pub flush: AtomicU64,
}

#[derive(Debug)]
pub struct CounterSlot {
    pub handler: HandlerCounter,
    pub processors: Box<[ProcessorCounter]>,
}

impl CounterSlot {
    fn new(processors: usize) -> Self {
        CounterSlot {
            handler: HandlerCounter::default(),
            processors: (0..processors).map(|_| ProcessorCounter::default()).collect(),
        }
    }

    fn drain(&self) -> CounterSnapshot {
        CounterSnapshot {
            handler: HandlerStats {
                flow: self.handler.flow.swap(0, Ordering::Relaxed),
                drop: self.handler.drop.swap(0, Ordering::Relaxed),
            },
            processors: self
                .processors
                .iter()
                .map(|p| ProcessorStats {
                    doc: p.doc.swap(0, Ordering::Relaxed),
                    max: p.max.swap(0, Ordering::Relaxed),
                    rejection: p.rejection.swap(0, Ordering::Relaxed),
                    emit: p.emit.swap(0, Ordering::Relaxed),
                    flush: p.flush.swap(0, Ordering::Relaxed),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    pub flow: u64,
    pub drop: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub doc: u64,
    pub max: u64,
    pub rejection: u64,
    pub emit: u64,
    pub flush: u64,
}

/// Plain copy of one drained slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub handler: HandlerStats,
    pub processors: Vec<ProcessorStats>,
}

impl CounterSnapshot {
    pub fn is_zero(&self) -> bool {
        self.handler == HandlerStats::default()
            && self
                .processors
                .iter()
                .all(|p| *p == ProcessorStats::default())
    }
}

/// Active/retired slot pair
#[derive(Debug)]
pub struct CounterPair {
    slots: [CachePadded<CounterSlot>; 2],
    latch: AtomicUsize,
}

impl CounterPair {
    pub fn new(processors: usize) -> Self {
        CounterPair {
            slots: [
                CachePadded::new(CounterSlot::new(processors)),
                CachePadded::new(CounterSlot::new(processors)),
            ],
            latch: AtomicUsize::new(0),
        }
    }

    /// Slot the writer should update
    #[inline]
    pub fn active(&self) -> &CounterSlot {
        &self.slots[self.latch.load(Ordering::Acquire) & 1]
    }

    /// Flip the latch and drain the slot that was active until now
    pub fn swap_and_drain(&self) -> CounterSnapshot {
        let retired = self.latch.fetch_xor(1, Ordering::AcqRel) & 1;
        self.slots[retired].drain()
    }
}

/// Append stat items for a snapshot; `names` lists processors by index
pub fn fill_stat_items(items: &mut Vec<StatItem>, snapshot: &CounterSnapshot, names: &[String]) {
    items.push(StatItem::counter("flow", snapshot.handler.flow));
    items.push(StatItem::counter("drop", snapshot.handler.drop));
    for (name, p) in names.iter().zip(&snapshot.processors) {
        items.push(StatItem::counter("doc", p.doc).with_tag("processor", name.as_str()));
        items.push(StatItem::gauge("max", p.max).with_tag("processor", name.as_str()));
        items.push(StatItem::counter("rejection", p.rejection).with_tag("processor", name.as_str()));
        items.push(StatItem::counter("emit", p.emit).with_tag("processor", name.as_str()));
        items.push(StatItem::counter("flush", p.flush).with_tag("processor", name.as_str()));
    }
}

/// Counters of one sub-handler, shared with the stats collector
#[derive(Debug)]
pub struct ShardCounters {
    pair: CounterPair,
    names: Vec<String>,
    closed: AtomicBool,
}

impl ShardCounters {
    pub fn new(names: Vec<String>) -> Self {
        ShardCounters {
            pair: CounterPair::new(names.len()),
            names,
            closed: AtomicBool::new(false),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Drain the retired slot as a plain snapshot
    pub fn snapshot(&self) -> CounterSnapshot {
        self.pair.swap_and_drain()
    }

    #[inline]
    pub fn record_flow(&self) {
        self.pair.active().handler.flow.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drop(&self) {
        self.pair.active().handler.drop.fetch_add(1, Ordering::Relaxed);
    }

    /// Count documents emitted for one packet and track the per-packet max
    #[inline]
    pub fn record_docs(&self, processor: usize, docs: u64) {
        let p = &self.pair.active().processors[processor];
        p.doc.fetch_add(docs, Ordering::Relaxed);
        p.max.fetch_max(docs, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejection(&self, processor: usize, rejected: u64) {
        if rejected > 0 {
            self.pair.active().processors[processor]
                .rejection
                .fetch_add(rejected, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_emit(&self, processor: usize, docs: u64) {
        self.pair.active().processors[processor]
            .emit
            .fetch_add(docs, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush(&self, processor: usize) {
        self.pair.active().processors[processor]
            .flush
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Countable for ShardCounters {
    fn get_counter(&self) -> Vec<StatItem> {
        let snapshot = self.snapshot();
        let mut items = Vec::with_capacity(2 + self.names.len() * 5);
        fill_stat_items(&mut items, &snapshot, &self.names);
        items
    }

    fn closed(&self) -> bool {
        self.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counters() -> ShardCounters {
        ShardCounters::new(vec!["usage".to_string(), "other".to_string()])
    }

    #[test]
    fn test_snapshot_returns_activity_then_zero() {
        let c = counters();
        c.record_flow();
        c.record_flow();
        c.record_drop();
        c.record_docs(0, 3);
        c.record_docs(0, 5);
        c.record_docs(1, 1);
        c.record_rejection(1, 2);
        c.record_emit(0, 8);
        c.record_flush(0);

        let first = c.snapshot();
        assert_eq!(first.handler, HandlerStats { flow: 2, drop: 1 });
        assert_eq!(
            first.processors[0],
            ProcessorStats {
                doc: 8,
                max: 5,
                rejection: 0,
                emit: 8,
                flush: 1
            }
        );
        assert_eq!(first.processors[1].rejection, 2);

        let second = c.snapshot();
        assert!(second.is_zero(), "retired slot was drained and zeroed");
        let third = c.snapshot();
        assert!(third.is_zero());
    }

    #[test]
    fn test_writes_between_reads_land_in_next_snapshot() {
        let c = counters();
        c.record_flow();
        assert_eq!(c.snapshot().handler.flow, 1);

        c.record_flow();
        c.record_flow();
        assert_eq!(c.snapshot().handler.flow, 2);
    }

    #[test]
    fn test_stat_items_layout() {
        let c = counters();
        c.record_docs(1, 4);
        let items = c.get_counter();

        assert_eq!(items.len(), 2 + 2 * 5);
        let doc = items
            .iter()
            .find(|i| i.name == "doc" && i.tags == vec![("processor", "other".to_string())])
            .expect("doc item for second processor");
        assert_eq!(doc.value, 4);
    }

    #[test]
    fn test_concurrent_reader_never_loses_counts() {
        let c = Arc::new(counters());
        let writer = {
            let c = c.clone();
            std::thread::spawn(move || {
                for _ in 0..100_000 {
                    c.record_flow();
                }
            })
        };

        let mut total = 0;
        while !writer.is_finished() {
            total += c.snapshot().handler.flow;
        }
        writer.join().unwrap();
        total += c.snapshot().handler.flow;
        total += c.snapshot().handler.flow;

        assert_eq!(total, 100_000);
    }

    #[test]
    fn test_closed_flag() {
        let c = counters();
        assert!(!Countable::closed(&c));
        c.mark_closed();
        assert!(Countable::closed(&c));
    }
}
