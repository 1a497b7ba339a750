use super::MeterPacket;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Free list of boxed packets shared by the decoder and the sub-handlers
///
/// `acquire` falls back to a fresh allocation when the free list is empty;
/// `release` drops the box when the free list is full.
pub struct PacketPool {
    pool: ArrayQueue<Box<MeterPacket>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Lifetime totals of a [`PacketPool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
}

impl PoolStats {
    /// Packets handed out and not yet returned
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

impl PacketPool {
    pub fn new(size: usize) -> Self {
        let pool = ArrayQueue::new(size.max(1));
        for _ in 0..size {
            let _ = pool.push(Box::default());
        }
        PacketPool {
            pool,
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Take a packet in its default state
    pub fn acquire(&self) -> Box<MeterPacket> {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.pool.pop().unwrap_or_default()
    }

    /// Return a packet; consumes the box so it can only be released once
    pub fn release(&self, mut packet: Box<MeterPacket>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        packet.reset();
        let _ = self.pool.push(packet);
    }

    /// Packets currently sitting in the free list
    pub fn available(&self) -> usize {
        self.pool.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(4096)
    }
}
