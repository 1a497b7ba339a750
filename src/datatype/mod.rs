//! Decoded measurement events
//!
//! A [`MeterPacket`] is produced by the decoder, travels through the input
//! queue as a pooled `Box`, and is handed back to the [`PacketPool`] by the
//! sub-handler once every processor has seen it.

mod pool;

pub use pool::{PacketPool, PoolStats};

use std::net::Ipv4Addr;
use std::time::Duration;

/// Traffic direction relative to the observed endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    ClientToServer,
    ServerToClient,
}

/// Policy association resolved by the classifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyData {
    /// ACL groups the packet matched
    pub acl_gids: Vec<u32>,
}

/// One side of an endpoint association
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    pub l3_epc_id: i32,
    pub group_ids: Vec<u32>,
    pub is_l2_end: bool,
    pub is_l3_end: bool,
}

/// Endpoint association for both sides of a packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointData {
    pub src: EndpointInfo,
    pub dst: EndpointInfo,
}

/// A decoded per-packet measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterPacket {
    /// Capture time since the UNIX epoch
    pub timestamp: Duration,
    pub ip_src: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub port_src: u16,
    pub port_dst: u16,
    pub protocol: u8,
    pub direction: Direction,
    pub packet_len: u32,
    /// Classification data; a packet without either part is invalid
    pub policy: Option<PolicyData>,
    pub endpoint: Option<EndpointData>,
}

impl Default for MeterPacket {
    fn default() -> Self {
        MeterPacket {
            timestamp: Duration::ZERO,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            port_src: 0,
            port_dst: 0,
            protocol: 0,
            direction: Direction::default(),
            packet_len: 0,
            policy: None,
            endpoint: None,
        }
    }
}

impl MeterPacket {
    /// True when both policy and endpoint data are attached
    #[inline]
    pub fn is_classified(&self) -> bool {
        self.policy.is_some() && self.endpoint.is_some()
    }

    /// Capture time truncated to whole seconds
    #[inline]
    pub fn timestamp_secs(&self) -> u32 {
        self.timestamp.as_secs().min(u32::MAX as u64) as u32
    }

    /// Reset to the default state before the box goes back to the pool
    #[inline]
    pub fn reset(&mut self) {
        *self = MeterPacket::default();
    }
}
