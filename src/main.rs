//! Metering mapper daemon
//!
//! Runs the aggregation stage against a synthetic packet source and drains
//! the output queue, logging what comes out.
//!
//! Usage: `metering-mapper [config.toml]`

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use metering_mapper::datatype::{EndpointData, EndpointInfo, PolicyData};
use metering_mapper::io::{system_clock, Clock};
use metering_mapper::observability::{init_tracing, SharedMetrics};
use metering_mapper::queue::{HashKey, QueueWriter};
use metering_mapper::{
    multi_queue, new_metering_map_process, Document, MeterPacket, MeteringConfig,
    MultiQueueReader, MultiQueueWriter, PacketPool, QueueItem, StatsCollector,
};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const OUTPUT_PARTITIONS: usize = 4;
const GENERATOR_BATCH: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    init_tracing(json)?;

    let config = match std::env::args().nth(1) {
        Some(path) => MeteringConfig::from_file(&path)?,
        None => MeteringConfig::default(),
    };
    config.validate()?;

    info!(
        input_count = config.input_count,
        docs_in_buffer = config.docs_in_buffer,
        window_size = config.window_size,
        "starting metering mapper"
    );

    let (in_writer, in_reader) =
        multi_queue::<Box<MeterPacket>>(config.input_count, config.queue_size, config.recv_timeout());
    let (out_writer, out_reader) =
        multi_queue::<Document>(OUTPUT_PARTITIONS, config.queue_size, config.recv_timeout());
    let pool = Arc::new(PacketPool::default());

    let collector = StatsCollector::new(metrics_recorder());
    let handler = new_metering_map_process(
        Arc::new(out_writer),
        Arc::new(in_reader),
        config.clone(),
        pool.clone(),
        collector.handle(),
    );
    let handle = handler.start();

    let stats_token = CancellationToken::new();
    let generator_token = CancellationToken::new();
    let stats_task = tokio::spawn(collector.run(config.stats_interval(), stats_token.clone()));
    let generator = tokio::spawn(generate(in_writer, pool.clone(), generator_token.clone()));

    let out_reader = Arc::new(out_reader);
    let sinks: Vec<_> = (0..OUTPUT_PARTITIONS)
        .map(|partition| tokio::spawn(drain_output(out_reader.clone(), partition as HashKey)))
        .collect();

    signal::ctrl_c().await?;
    info!("shutdown requested");

    generator_token.cancel();
    if let Err(e) = generator.await {
        error!("packet generator ended abnormally: {}", e);
    }
    handle.shutdown().await;
    // Final poll after the shards' last flush
    stats_token.cancel();
    if let Err(e) = stats_task.await {
        error!("stats collector ended abnormally: {}", e);
    }
    for sink in sinks {
        sink.abort();
    }

    let pool_stats = pool.stats();
    info!(
        acquired = pool_stats.acquired,
        released = pool_stats.released,
        "packet pool at exit"
    );
    Ok(())
}

#[cfg(feature = "datadog")]
fn metrics_recorder() -> SharedMetrics {
    use metering_mapper::observability::{StatsdConfig, StatsdMetrics};
    Arc::new(StatsdMetrics::new(&StatsdConfig::from_env()))
}

#[cfg(not(feature = "datadog"))]
fn metrics_recorder() -> SharedMetrics {
    metering_mapper::observability::noop_metrics()
}

/// Feed random classified packets until cancelled
async fn generate(
    writer: QueueWriter<Box<MeterPacket>>,
    pool: Arc<PacketPool>,
    token: CancellationToken,
) {
    let clock = system_clock();
    let shards = writer.partition_count() as HashKey;
    let mut shard: HashKey = 0;
    let mut pace = tokio::time::interval(Duration::from_millis(10));

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = pace.tick() => {}
        }
        let batch: Vec<Box<MeterPacket>> = {
            let mut rng = rand::thread_rng();
            (0..GENERATOR_BATCH)
                .map(|_| {
                    let mut packet = pool.acquire();
                    fill_random(&mut packet, clock.now(), &mut rng);
                    packet
                })
                .collect()
        };
        if writer.put(shard % shards, batch).await.is_err() {
            break;
        }
        shard = shard.wrapping_add(1);
    }
}

fn fill_random(packet: &mut MeterPacket, now: Duration, rng: &mut impl Rng) {
    packet.timestamp = now;
    packet.ip_src = Ipv4Addr::new(10, 0, 0, rng.gen_range(1..16));
    packet.ip_dst = Ipv4Addr::new(10, 0, 1, rng.gen_range(1..16));
    packet.port_src = rng.gen_range(32768..61000);
    packet.port_dst = [80, 443, 3306, 6379][rng.gen_range(0..4)];
    packet.protocol = 6;
    packet.packet_len = rng.gen_range(64..1500);
    packet.policy = Some(PolicyData {
        acl_gids: vec![rng.gen_range(1..4)],
    });
    packet.endpoint = Some(EndpointData {
        src: EndpointInfo {
            l3_epc_id: rng.gen_range(1..8),
            ..Default::default()
        },
        dst: EndpointInfo {
            l3_epc_id: rng.gen_range(1..8),
            ..Default::default()
        },
    });
}

/// Consume one output partition, encoding every document as JSON
async fn drain_output(reader: Arc<dyn MultiQueueReader<Document>>, partition: HashKey) {
    let mut buf = Vec::with_capacity(4096);
    while reader.gets(partition, &mut buf, 4096).await.is_ok() {
        let mut docs = 0usize;
        let mut bytes = 0usize;
        for item in &buf {
            let QueueItem::Item(doc) = item else { continue };
            match doc.to_json() {
                Ok(line) => {
                    docs += 1;
                    bytes += line.len();
                    trace!(partition, "{}", line);
                }
                Err(e) => warn!(partition, "failed to encode document: {}", e),
            }
        }
        if docs > 0 {
            debug!(partition, docs, bytes, "output batch");
        }
    }
}
