//! End-to-end tests of the metering aggregation stage
//!
//! Packets go through real queues and spawned shard workers; output is
//! collected after shutdown so every document has been flushed.

use metering_mapper::datatype::{EndpointData, PolicyData};
use metering_mapper::io::{Clock, SystemClock};
use metering_mapper::observability::{simulated_metrics, MetricType};
use metering_mapper::queue::{QueueReader, QueueWriter};
use metering_mapper::{
    multi_queue, Document, Meter, MeterPacket, MeteringConfig, MeteringHandler,
    MeteringProcessor, MultiQueueWriter, PacketPool, StatsCollector, StatsHandle, Tag,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One document per packet keyed by destination port
#[derive(Clone)]
struct PortProcessor;

impl MeteringProcessor for PortProcessor {
    fn name(&self) -> &str {
        "port"
    }

    fn prepare(&mut self) {}

    fn process(&mut self, packet: &MeterPacket, _varied_tags: bool) -> Vec<Document> {
        vec![Document::new(
            packet.timestamp_secs(),
            Tag::new().with("port", packet.port_dst),
            Meter::new().sum("packet", 1).sum("byte", packet.packet_len as u64),
        )]
    }
}

struct Pipeline {
    handler: MeteringHandler,
    input: QueueWriter<Box<MeterPacket>>,
    output: QueueReader<Document>,
    pool: Arc<PacketPool>,
}

fn pipeline(config: MeteringConfig, stats: StatsHandle) -> Pipeline {
    let (input, in_reader) = multi_queue(config.input_count, 1 << 14, config.recv_timeout());
    let (out_writer, output) = multi_queue(4, 1 << 16, config.recv_timeout());
    let pool = Arc::new(PacketPool::new(1024));
    let handler = MeteringHandler::new(
        vec![Box::new(PortProcessor)],
        Arc::new(out_writer),
        Arc::new(in_reader),
        config,
        pool.clone(),
        stats,
    );
    Pipeline {
        handler,
        input,
        output,
        pool,
    }
}

/// A classified packet stamped with one shared second so no window moves mid-test
fn packet(pool: &PacketPool, timestamp: Duration, port: u16) -> Box<MeterPacket> {
    let mut packet = pool.acquire();
    packet.timestamp = timestamp;
    packet.port_dst = port;
    packet.packet_len = 100;
    packet.policy = Some(PolicyData::default());
    packet.endpoint = Some(EndpointData::default());
    packet
}

fn now_secs() -> Duration {
    Duration::from_secs(SystemClock.now().as_secs())
}

#[tokio::test]
async fn test_every_distinct_tag_emitted_once() {
    let config = MeteringConfig::default()
        .with_input_count(1)
        .with_docs_in_buffer(16)
        .with_recv_timeout(Duration::from_millis(50));
    let p = pipeline(config, StatsHandle::default());
    let handle = p.handler.start();

    let ts = now_secs();
    let packets: Vec<_> = (0..100).map(|port| packet(&p.pool, ts, port)).collect();
    p.input.put(0, packets).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let counters = handle.counters(0).unwrap();
    handle.shutdown().await;

    let docs = p.output.drain_all();
    println!("\n=== Distinct Tags ===");
    println!("Packets: 100, documents out: {}", docs.len());

    assert_eq!(docs.len(), 100);
    let snap = counters.snapshot();
    assert_eq!(snap.handler.flow, 100);
    assert_eq!(snap.handler.drop, 0);
    assert_eq!(snap.processors[0].emit, 100);
    assert_eq!(snap.processors[0].flush, 6, "100 docs through a 16-doc stash");
    assert!(counters.is_closed());
    assert_eq!(p.pool.stats().outstanding(), 0);
}

#[tokio::test]
async fn test_duplicates_merge_into_one_document_per_tag() {
    let config = MeteringConfig::default()
        .with_input_count(1)
        .with_recv_timeout(Duration::from_millis(50));
    let p = pipeline(config, StatsHandle::default());
    let handle = p.handler.start();

    let ts = now_secs();
    for _ in 0..10 {
        let packets: Vec<_> = (0..100).map(|i| packet(&p.pool, ts, i % 10)).collect();
        p.input.put(0, packets).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    let docs = p.output.drain_all();
    let mut per_port: HashMap<String, u64> = HashMap::new();
    for doc in &docs {
        *per_port.entry(doc.tag.to_string()).or_default() += doc.meter.get("packet").unwrap();
    }

    println!("\n=== Duplicate Merge ===");
    println!("Packets: 1000, documents out: {}", docs.len());

    assert_eq!(docs.len(), 10);
    assert!(per_port.values().all(|&n| n == 100));
    assert!(docs.iter().all(|d| d.meter.get("byte") == Some(100 * 100)));
}

#[tokio::test]
async fn test_idle_shard_flushes_on_tick() {
    let config = MeteringConfig::default()
        .with_input_count(1)
        .with_recv_timeout(Duration::from_millis(20));
    let p = pipeline(config, StatsHandle::default());
    let handle = p.handler.start();

    let ts = now_secs();
    let packets: Vec<_> = (0..5).map(|port| packet(&p.pool, ts, port)).collect();
    p.input.put(0, packets).await.unwrap();

    let mut docs = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        docs.extend(p.output.drain_all());
        if docs.len() == 5 {
            break;
        }
    }
    assert_eq!(docs.len(), 5, "documents should leave without shutdown");
    assert!(!handle.closed());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_invalid_packets_only_drop() {
    let config = MeteringConfig::default()
        .with_input_count(1)
        .with_recv_timeout(Duration::from_millis(50));
    let p = pipeline(config, StatsHandle::default());
    let handle = p.handler.start();

    let packets: Vec<_> = (0..20)
        .map(|_| {
            let mut packet = p.pool.acquire();
            packet.timestamp = now_secs();
            packet
        })
        .collect();
    p.input.put(0, packets).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let counters = handle.counters(0).unwrap();
    handle.shutdown().await;

    let snap = counters.snapshot();
    assert_eq!(snap.handler.drop, 20);
    assert_eq!(snap.handler.flow, 0);
    assert!(p.output.drain_all().is_empty());
    assert_eq!(p.pool.stats().outstanding(), 0);
}

#[tokio::test]
async fn test_shards_aggregate_independently() {
    let config = MeteringConfig::default()
        .with_input_count(2)
        .with_recv_timeout(Duration::from_millis(50));
    let p = pipeline(config, StatsHandle::default());
    let handle = p.handler.start();
    assert_eq!(handle.shard_count(), 2);

    let ts = now_secs();
    p.input.put(0, vec![packet(&p.pool, ts, 80)]).await.unwrap();
    p.input.put(1, vec![packet(&p.pool, ts, 80)]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    let docs = p.output.drain_all();
    assert_eq!(docs.len(), 2, "one document per shard for the same tag");
    assert!(docs.iter().all(|d| d.meter.get("packet") == Some(1)));
}

#[tokio::test]
async fn test_stats_collector_reports_and_unregisters() {
    let metrics = simulated_metrics();
    let collector = StatsCollector::new(metrics.clone());
    let config = MeteringConfig::default()
        .with_input_count(2)
        .with_recv_timeout(Duration::from_millis(50));
    let p = pipeline(config, collector.handle());
    let handle = p.handler.start();
    assert_eq!(collector.handle().registered(), 2);

    let ts = now_secs();
    let packets: Vec<_> = (0..30).map(|port| packet(&p.pool, ts, port)).collect();
    p.input.put(1, packets).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;
    collector.collect_once();

    println!("\n=== Stats ===");
    for m in metrics.get_by_name("metering-mapper.flow") {
        println!("{} = {} {:?}", m.name, m.value, m.tags);
    }

    assert_eq!(metrics.sum_by_name("metering-mapper.flow"), 30.0);
    assert_eq!(metrics.sum_by_name("metering-mapper.emit"), 30.0);
    assert!(metrics.assert_metric("metering-mapper.max", MetricType::Gauge));
    assert!(metrics
        .get_by_name("metering-mapper.flow")
        .iter()
        .any(|m| m.has_tag("index:1") && m.value == 30.0));
    assert!(metrics
        .get_by_name("metering-mapper.doc")
        .iter()
        .all(|m| m.has_tag("processor:port")));
    assert_eq!(collector.handle().registered(), 0, "closed shards unregister");
}
