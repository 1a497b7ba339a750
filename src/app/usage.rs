//! Usage metering: packet and byte volume per endpoint pair and per ACL group

use super::MeteringProcessor;
use crate::datatype::{Direction, MeterPacket};
use crate::document::{Document, Meter, Tag};

/// Default processor of the metering pipeline
///
/// Emits one edge document keyed by the source/destination EPC pair and
/// protocol, plus one document per distinct ACL group the packet matched.
#[derive(Debug, Clone, Default)]
pub struct UsageProcessor {
    acl_scratch: Vec<u32>,
    processed: u64,
}

impl UsageProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets seen since the last `prepare`
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn meter(packet: &MeterPacket) -> Meter {
        let bytes = packet.packet_len as u64;
        let (packet_tx, packet_rx, byte_tx, byte_rx) = match packet.direction {
            Direction::ClientToServer => (1, 0, bytes, 0),
            Direction::ServerToClient => (0, 1, 0, bytes),
        };
        Meter::with_capacity(5)
            .sum("packet_tx", packet_tx)
            .sum("packet_rx", packet_rx)
            .sum("byte_tx", byte_tx)
            .sum("byte_rx", byte_rx)
            .max("max_packet_len", bytes)
    }
}

impl MeteringProcessor for UsageProcessor {
    fn name(&self) -> &str {
        "usage"
    }

    fn prepare(&mut self) {
        self.acl_scratch.clear();
        self.processed = 0;
    }

    fn process(&mut self, packet: &MeterPacket, varied_tags: bool) -> Vec<Document> {
        let (Some(policy), Some(endpoint)) = (&packet.policy, &packet.endpoint) else {
            return Vec::new();
        };
        self.processed += 1;

        let timestamp = packet.timestamp_secs();
        let meter = Self::meter(packet);

        self.acl_scratch.clear();
        self.acl_scratch.extend_from_slice(&policy.acl_gids);
        self.acl_scratch.sort_unstable();
        self.acl_scratch.dedup();

        let mut docs = Vec::with_capacity(1 + self.acl_scratch.len());

        let mut edge = Tag::new()
            .with("l3_epc_id_0", endpoint.src.l3_epc_id)
            .with("l3_epc_id_1", endpoint.dst.l3_epc_id)
            .with("protocol", packet.protocol);
        if varied_tags {
            edge.push("server_port", packet.port_dst);
        }
        docs.push(Document::new(timestamp, edge, meter.clone()));

        for &gid in &self.acl_scratch {
            docs.push(Document::new(
                timestamp,
                Tag::new().with("acl_gid", gid),
                meter.clone(),
            ));
        }
        docs
    }
}
