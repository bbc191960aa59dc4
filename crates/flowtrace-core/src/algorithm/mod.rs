//! The two probing algorithms (C6 traceroute, C7 MDA) and their shared
//! statistical stopping rule.

pub mod mda;
pub mod stopping;
pub mod traceroute;

pub use mda::MdaAlgorithm;
pub use traceroute::TracerouteAlgorithm;

use crate::config::Protocol;
use crate::error::Result;
use crate::types::{FlowId, Sequence, TimeToLive};
use flowtrace_packet::{Field, FieldKey, FieldValue, Layer, Packet};
use std::net::IpAddr;

/// One probe an algorithm wants the event loop to assemble and send.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub sequence: Sequence,
    pub ttl: TimeToLive,
    pub flow_id: FlowId,
    pub packet: Packet,
}

/// Assemble and finalize a probe packet for `protocol` over `family`,
/// carrying `flow_id` via [`Packet::set_flow_id`] (the checksum-compensator
/// for UDP, the initial sequence number for TCP, the echo sequence for
/// ICMP), per §4.1/§9.
pub fn build_probe_packet(
    source: IpAddr,
    destination: IpAddr,
    protocol: Protocol,
    src_port: u16,
    dst_port: u16,
    ttl: TimeToLive,
    flow_id: FlowId,
) -> Result<Packet> {
    let is_v4 = destination.is_ipv4();
    let ip_layer = if is_v4 { Layer::Ipv4 } else { Layer::Ipv6 };
    let transport_layer = match protocol {
        Protocol::Udp => Layer::Udp,
        Protocol::Tcp => Layer::Tcp,
        Protocol::Icmp if is_v4 => Layer::Icmpv4,
        Protocol::Icmp => Layer::Icmpv6,
    };
    let mut packet = Packet::set_protocols(&[ip_layer, transport_layer], 2)?;
    let src_field = match source {
        IpAddr::V4(a) => FieldValue::V4(a.octets()),
        IpAddr::V6(a) => FieldValue::V6(a.octets()),
    };
    let dst_field = match destination {
        IpAddr::V4(a) => FieldValue::V4(a.octets()),
        IpAddr::V6(a) => FieldValue::V6(a.octets()),
    };
    packet.set_fields(&[
        Field::new(FieldKey("src"), src_field),
        Field::new(FieldKey("dst"), dst_field),
        Field::new(FieldKey("ttl"), FieldValue::U8(ttl.0)),
    ])?;
    if matches!(protocol, Protocol::Udp | Protocol::Tcp) {
        packet.set_fields(&[
            Field::new(FieldKey("src_port"), FieldValue::U16(src_port)),
            Field::new(FieldKey("dst_port"), FieldValue::U16(dst_port)),
        ])?;
    }
    packet.finalize()?;
    packet.set_flow_id(flow_id.0)?;
    Ok(packet)
}
