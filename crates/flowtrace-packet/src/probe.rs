//! Probe and reply matching (component C2).
//!
//! Every probe carries a [`MatchingKey`]: exactly the header fields an ICMP
//! Time-Exceeded (or Destination-Unreachable) message quotes back verbatim.
//! A reply is paired with its probe by recomputing the same key from the
//! quoted bytes and looking it up in the outstanding-probe index.

use crate::address::{Address, Family};
use crate::layer::Layer;
use crate::packet::Packet;
use std::time::SystemTime;

/// Exactly the fields an ICMP Time-Exceeded quotes back from the original
/// packet: source/destination address, IP protocol, IPv4 identification or
/// IPv6 flow label, and the first 8 bytes of the transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchingKey {
    pub src: Address,
    pub dst: Address,
    pub ip_protocol: u8,
    pub ip_id_or_flow_label: u32,
    pub transport_first8: [u8; 8],
}

impl MatchingKey {
    /// Compute the matching key for an outgoing probe packet.
    #[must_use]
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let bytes = packet.as_bytes();
        let mut layers = packet.layers();
        let ip_layer = layers.next()?;
        let transport_layer = layers.next()?;
        match ip_layer {
            Layer::Ipv4 => {
                let src = Address::V4(bytes[12..16].try_into().ok()?);
                let dst = Address::V4(bytes[16..20].try_into().ok()?);
                let ip_protocol = bytes[9];
                let id = u32::from(u16::from_be_bytes([bytes[4], bytes[5]]));
                let t8 = transport_first8(bytes, 20, transport_layer)?;
                Some(Self {
                    src,
                    dst,
                    ip_protocol,
                    ip_id_or_flow_label: id,
                    transport_first8: t8,
                })
            }
            Layer::Ipv6 => {
                let src = Address::V6(bytes[8..24].try_into().ok()?);
                let dst = Address::V6(bytes[24..40].try_into().ok()?);
                let ip_protocol = bytes[6];
                let flow_label = u32::from_be_bytes([0, bytes[1] & 0x0F, bytes[2], bytes[3]]);
                let t8 = transport_first8(bytes, 40, transport_layer)?;
                Some(Self {
                    src,
                    dst,
                    ip_protocol,
                    ip_id_or_flow_label: flow_label,
                    transport_first8: t8,
                })
            }
            _ => None,
        }
    }

    /// Build a candidate matching key from a quoted IPv4 header + 8 bytes of
    /// transport header, as returned inside an ICMP Time-Exceeded payload.
    #[must_use]
    pub fn from_quoted_ipv4(quoted: &[u8]) -> Option<Self> {
        if quoted.len() < 28 {
            return None;
        }
        let ihl = usize::from(quoted[0] & 0x0F) * 4;
        if quoted.len() < ihl + 8 {
            return None;
        }
        let src = Address::V4(quoted[12..16].try_into().ok()?);
        let dst = Address::V4(quoted[16..20].try_into().ok()?);
        let ip_protocol = quoted[9];
        let id = u32::from(u16::from_be_bytes([quoted[4], quoted[5]]));
        let mut t8 = [0_u8; 8];
        t8.copy_from_slice(&quoted[ihl..ihl + 8]);
        Some(Self {
            src,
            dst,
            ip_protocol,
            ip_id_or_flow_label: id,
            transport_first8: t8,
        })
    }

    #[must_use]
    pub fn from_quoted_ipv6(quoted: &[u8]) -> Option<Self> {
        if quoted.len() < 48 {
            return None;
        }
        let src = Address::V6(quoted[8..24].try_into().ok()?);
        let dst = Address::V6(quoted[24..40].try_into().ok()?);
        let ip_protocol = quoted[6];
        let flow_label = u32::from_be_bytes([0, quoted[1] & 0x0F, quoted[2], quoted[3]]);
        let mut t8 = [0_u8; 8];
        t8.copy_from_slice(&quoted[40..48]);
        Some(Self {
            src,
            dst,
            ip_protocol,
            ip_id_or_flow_label: flow_label,
            transport_first8: t8,
        })
    }

    /// Build the key a bare ICMP echo reply presents: unlike Time-Exceeded
    /// it carries no quoted copy of the probe, so matching falls back to the
    /// identifier/sequence the destination copies back verbatim. Address
    /// fields are the star sentinel rather than the probe's real endpoints,
    /// since a raw ICMPv6 socket never delivers the outer IPv6 header to
    /// reconstruct them from (see [`Self::direct_reply_key`]).
    #[must_use]
    pub fn from_icmp_echo_reply(family: Family, identifier: u16, sequence: u16) -> Self {
        let ip_protocol = match family {
            Family::V4 => 1,
            Family::V6 => 58,
        };
        let star = Address::star(family);
        let mut t8 = [0_u8; 8];
        t8[4..6].copy_from_slice(&identifier.to_be_bytes());
        t8[6..8].copy_from_slice(&sequence.to_be_bytes());
        Self {
            src: star,
            dst: star,
            ip_protocol,
            ip_id_or_flow_label: 0,
            transport_first8: t8,
        }
    }

    /// Build the key a TCP RST or SYN+ACK from the destination presents.
    /// `src_port`/`dst_port` are the probe's own ports (not the reply's,
    /// which arrive swapped — callers reconstructing a key from a reply
    /// must swap them back). `flow_id` is recovered from `ack - 1`, since
    /// the probe's flow id was written into the initial sequence number
    /// ([`crate::packet::Packet::set_flow_id`]). Same star-address
    /// simplification as [`Self::from_icmp_echo_reply`].
    #[must_use]
    pub fn from_tcp_reply(family: Family, src_port: u16, dst_port: u16, flow_id: u16) -> Self {
        let star = Address::star(family);
        let mut t8 = [0_u8; 8];
        t8[0..2].copy_from_slice(&src_port.to_be_bytes());
        t8[2..4].copy_from_slice(&dst_port.to_be_bytes());
        t8[6..8].copy_from_slice(&flow_id.to_be_bytes());
        Self {
            src: star,
            dst: star,
            ip_protocol: 6,
            ip_id_or_flow_label: 0,
            transport_first8: t8,
        }
    }

    /// The reduced key this probe would be matched under if its destination
    /// replies directly (ICMP echo reply, or a TCP reset/syn-ack) instead of
    /// a router quoting it back inside a Time-Exceeded. `None` for UDP,
    /// which is only ever confirmed via a quoted ICMP port-unreachable and
    /// so has no direct-reply counterpart.
    #[must_use]
    pub fn direct_reply_key(&self) -> Option<Self> {
        let family = self.src.family();
        match self.ip_protocol {
            1 | 58 => {
                let identifier = u16::from_be_bytes([self.transport_first8[4], self.transport_first8[5]]);
                let sequence = u16::from_be_bytes([self.transport_first8[6], self.transport_first8[7]]);
                Some(Self::from_icmp_echo_reply(family, identifier, sequence))
            }
            6 => {
                let src_port = u16::from_be_bytes([self.transport_first8[0], self.transport_first8[1]]);
                let dst_port = u16::from_be_bytes([self.transport_first8[2], self.transport_first8[3]]);
                let flow_id = u16::from_be_bytes([self.transport_first8[6], self.transport_first8[7]]);
                Some(Self::from_tcp_reply(family, src_port, dst_port, flow_id))
            }
            _ => None,
        }
    }
}

fn transport_first8(bytes: &[u8], ip_header_len: usize, transport_layer: Layer) -> Option<[u8; 8]> {
    let _ = transport_layer;
    if bytes.len() < ip_header_len + 8 {
        return None;
    }
    let mut out = [0_u8; 8];
    out.copy_from_slice(&bytes[ip_header_len..ip_header_len + 8]);
    Some(out)
}

/// A network-tracing probe: an assembled packet plus send/receive timestamps
/// and a caller-supplied opaque context.
///
/// Once `sent` is set the packet bytes are frozen; nothing in this crate
/// mutates `packet` again.
#[derive(Debug, Clone)]
pub struct Probe<Ctx> {
    pub packet: Packet,
    pub matching_key: MatchingKey,
    pub sent: Option<SystemTime>,
    pub received: Option<SystemTime>,
    pub context: Ctx,
}

impl<Ctx> Probe<Ctx> {
    #[must_use]
    pub fn new(packet: Packet, context: Ctx) -> Option<Self> {
        let matching_key = MatchingKey::from_packet(&packet)?;
        Some(Self {
            packet,
            matching_key,
            sent: None,
            received: None,
            context,
        })
    }

    pub fn mark_sent(&mut self, at: SystemTime) {
        self.sent = Some(at);
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent.is_some()
    }
}

/// How a parsed ICMP/TCP reply classifies against the probe it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClassification {
    TimeExceeded,
    DestinationUnreachablePort,
    EchoReply,
    TcpResetOrSynAck,
    Other,
}

impl ReplyClassification {
    /// Does this classification mean the destination host itself replied
    /// (as opposed to an intermediate router's Time-Exceeded)?
    #[must_use]
    pub const fn is_destination_reached(self) -> bool {
        matches!(
            self,
            Self::DestinationUnreachablePort | Self::EchoReply | Self::TcpResetOrSynAck
        )
    }
}

/// A reply paired with the probe whose matching key it shares.
#[derive(Debug, Clone)]
pub struct Reply {
    pub responder: Address,
    pub classification: ReplyClassification,
    pub received: SystemTime,
    pub matching_key: MatchingKey,
}

impl Reply {
    #[must_use]
    pub const fn new(
        responder: Address,
        classification: ReplyClassification,
        received: SystemTime,
        matching_key: MatchingKey,
    ) -> Self {
        Self {
            responder,
            classification,
            received,
            matching_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKey, FieldValue};
    use crate::layer::Layer;

    #[test]
    fn matching_key_from_packet_reads_udp_first8() {
        let mut p = Packet::set_protocols(&[Layer::Ipv4, Layer::Udp], 4).unwrap();
        p.set_field(FieldKey("src"), FieldValue::V4([10, 0, 0, 1]))
            .unwrap();
        p.set_field(FieldKey("dst"), FieldValue::V4([10, 0, 0, 5]))
            .unwrap();
        p.set_field(FieldKey("identification"), FieldValue::U16(4242))
            .unwrap();
        p.finalize().unwrap();
        let key = MatchingKey::from_packet(&p).unwrap();
        assert_eq!(key.src, Address::V4([10, 0, 0, 1]));
        assert_eq!(key.dst, Address::V4([10, 0, 0, 5]));
        assert_eq!(key.ip_protocol, 17);
        assert_eq!(key.ip_id_or_flow_label, 4242);
    }

    #[test]
    fn quoted_v4_roundtrips_sent_key() {
        let mut p = Packet::set_protocols(&[Layer::Ipv4, Layer::Udp], 4).unwrap();
        p.set_field(FieldKey("src"), FieldValue::V4([10, 0, 0, 1]))
            .unwrap();
        p.set_field(FieldKey("dst"), FieldValue::V4([10, 0, 0, 5]))
            .unwrap();
        p.finalize().unwrap();
        let sent_key = MatchingKey::from_packet(&p).unwrap();
        let quoted_key = MatchingKey::from_quoted_ipv4(p.as_bytes()).unwrap();
        assert_eq!(sent_key, quoted_key);
    }

    #[test]
    fn icmp_echo_reply_direct_key_matches_sent_key() {
        let mut p = Packet::set_protocols(&[Layer::Ipv4, Layer::Icmpv4], 4).unwrap();
        p.set_field(FieldKey("src"), FieldValue::V4([10, 0, 0, 1]))
            .unwrap();
        p.set_field(FieldKey("dst"), FieldValue::V4([10, 0, 0, 5]))
            .unwrap();
        p.finalize().unwrap();
        p.set_flow_id(0xBEEF).unwrap();
        let sent_key = MatchingKey::from_packet(&p).unwrap();
        let reply_key = MatchingKey::from_icmp_echo_reply(Address::V4([10, 0, 0, 1]).family(), 0, 0xBEEF);
        assert_eq!(sent_key.direct_reply_key().unwrap(), reply_key);
    }

    #[test]
    fn tcp_reply_direct_key_matches_sent_key_with_ports_swapped() {
        let mut p = Packet::set_protocols(&[Layer::Ipv4, Layer::Tcp], 4).unwrap();
        p.set_field(FieldKey("src"), FieldValue::V4([10, 0, 0, 1]))
            .unwrap();
        p.set_field(FieldKey("dst"), FieldValue::V4([10, 0, 0, 5]))
            .unwrap();
        p.set_field(FieldKey("src_port"), FieldValue::U16(33434))
            .unwrap();
        p.set_field(FieldKey("dst_port"), FieldValue::U16(80))
            .unwrap();
        p.finalize().unwrap();
        p.set_flow_id(0xBEEF).unwrap();
        let sent_key = MatchingKey::from_packet(&p).unwrap();
        // the reply arrives with ports swapped; a caller handling a real
        // reply passes them pre-swapped so the reconstructed key lines up.
        let reply_key = MatchingKey::from_tcp_reply(Family::V4, 33434, 80, 0xBEEF);
        assert_eq!(sent_key.direct_reply_key().unwrap(), reply_key);
    }
}
