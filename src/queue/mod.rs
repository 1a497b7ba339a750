//! Sharded Multi-Queue
//!
//! The aggregation core only sees the [`MultiQueueReader`] and
//! [`MultiQueueWriter`] traits. [`multi_queue`] builds the in-process
//! implementation: one bounded tokio channel per shard.
//!
//! - `gets` blocks until at least one element arrives, then drains up to the
//!   caller's limit without waiting. When nothing arrives within the receive
//!   timeout it yields a single [`QueueItem::Tick`].
//! - `put` waits for channel capacity, so a slow consumer stalls only the
//!   producer writing to that partition.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Partition selector; reduced modulo the partition count
pub type HashKey = u64;

/// Element returned by a reader
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem<T> {
    /// Heartbeat produced when the shard stayed idle for a receive timeout
    Tick,
    Item(T),
}

/// Error type for queue operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Every sender (or the receiver) of the partition is gone
    Disconnected,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Disconnected => write!(f, "Queue partition disconnected"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Multi-shard reader with blocking batched reads
pub trait MultiQueueReader<T>: Send + Sync + 'static {
    /// Replace the contents of `buf` with up to `limit` elements read from
    /// shard `key`, returning how many were read. Never returns `Ok(0)`.
    fn gets<'a>(
        &'a self,
        key: HashKey,
        buf: &'a mut Vec<QueueItem<T>>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<usize, QueueError>> + Send + 'a>>;

    /// Number of shards
    fn shard_count(&self) -> usize;
}

/// Multi-partition writer with blocking puts
pub trait MultiQueueWriter<T>: Send + Sync + 'static {
    /// Append `items` to partition `key`, waiting for capacity
    fn put<'a>(
        &'a self,
        key: HashKey,
        items: Vec<T>,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>;

    /// Number of partitions
    fn partition_count(&self) -> usize;
}

/// Writing half of a [`multi_queue`]
pub struct QueueWriter<T> {
    senders: Vec<mpsc::Sender<T>>,
}

impl<T> Clone for QueueWriter<T> {
    fn clone(&self) -> Self {
        QueueWriter {
            senders: self.senders.clone(),
        }
    }
}

/// Reading half of a [`multi_queue`]
pub struct QueueReader<T> {
    receivers: Vec<Mutex<mpsc::Receiver<T>>>,
    recv_timeout: Duration,
}

/// Create a sharded queue with `count` partitions of `capacity` elements each
///
/// # Panics
///
/// Panics if `count` or `capacity` is zero.
pub fn multi_queue<T>(
    count: usize,
    capacity: usize,
    recv_timeout: Duration,
) -> (QueueWriter<T>, QueueReader<T>) {
    assert!(count > 0, "multi_queue needs at least one partition");
    let mut senders = Vec::with_capacity(count);
    let mut receivers = Vec::with_capacity(count);
    for _ in 0..count {
        let (tx, rx) = mpsc::channel(capacity);
        senders.push(tx);
        receivers.push(Mutex::new(rx));
    }
    (
        QueueWriter { senders },
        QueueReader {
            receivers,
            recv_timeout,
        },
    )
}

impl<T> QueueWriter<T> {
    #[inline]
    fn partition(&self, key: HashKey) -> &mpsc::Sender<T> {
        &self.senders[(key % self.senders.len() as u64) as usize]
    }
}

impl<T: Send + 'static> MultiQueueWriter<T> for QueueWriter<T> {
    fn put<'a>(
        &'a self,
        key: HashKey,
        items: Vec<T>,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>> {
        let sender = self.partition(key);
        Box::pin(async move {
            for item in items {
                sender
                    .send(item)
                    .await
                    .map_err(|_| QueueError::Disconnected)?;
            }
            Ok(())
        })
    }

    fn partition_count(&self) -> usize {
        self.senders.len()
    }
}

impl<T> QueueReader<T> {
    #[inline]
    fn shard(&self, key: HashKey) -> &Mutex<mpsc::Receiver<T>> {
        &self.receivers[(key % self.receivers.len() as u64) as usize]
    }

    /// Drain whatever is queued on shard `key` without waiting
    ///
    /// Returns an empty vector when another task is currently reading the shard.
    pub fn drain(&self, key: HashKey) -> Vec<T> {
        let mut items = Vec::new();
        if let Ok(mut rx) = self.shard(key).try_lock() {
            while let Ok(item) = rx.try_recv() {
                items.push(item);
            }
        }
        items
    }

    /// Drain every shard without waiting, in shard order
    pub fn drain_all(&self) -> Vec<T> {
        (0..self.receivers.len() as u64)
            .flat_map(|key| self.drain(key))
            .collect()
    }
}

impl<T: Send + 'static> MultiQueueReader<T> for QueueReader<T> {
    fn gets<'a>(
        &'a self,
        key: HashKey,
        buf: &'a mut Vec<QueueItem<T>>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<usize, QueueError>> + Send + 'a>> {
        let shard = self.shard(key);
        let recv_timeout = self.recv_timeout;
        Box::pin(async move {
            buf.clear();
            let mut rx = shard.lock().await;
            match tokio::time::timeout(recv_timeout, rx.recv()).await {
                Err(_) => {
                    buf.push(QueueItem::Tick);
                    return Ok(1);
                }
                Ok(None) => return Err(QueueError::Disconnected),
                Ok(Some(item)) => buf.push(QueueItem::Item(item)),
            }
            while buf.len() < limit.max(1) {
                match rx.try_recv() {
                    Ok(item) => buf.push(QueueItem::Item(item)),
                    Err(_) => break,
                }
            }
            Ok(buf.len())
        })
    }

    fn shard_count(&self) -> usize {
        self.receivers.len()
    }
}
