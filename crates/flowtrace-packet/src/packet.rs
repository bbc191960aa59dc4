//! The layered packet assembler (component C1).
//!
//! A [`Packet`] owns a contiguous byte buffer plus an ordered list of layer
//! descriptors and their offsets. Callers only ever see named fields; byte
//! offsets never escape this module.

use crate::checksum::{fold_sum, internet_checksum, partial_sum, pseudo_header_v4, pseudo_header_v6};
use crate::descriptor;
use crate::error::{PacketError, Result};
use crate::field::{Field, FieldKey, FieldValue};
use crate::layer::Layer;
use arrayvec::ArrayVec;

/// Every probe this crate assembles stacks at most an IP layer and one
/// transport layer; 4 is headroom, not a real ceiling.
type LayerOffsets = ArrayVec<(Layer, usize), 4>;

fn ip_protocol_number(layer: Layer) -> u8 {
    match layer {
        Layer::Udp => 17,
        Layer::Tcp => 6,
        Layer::Icmpv4 => 1,
        Layer::Icmpv6 => 58,
        Layer::Ipv4 | Layer::Ipv6 => 0,
    }
}

/// A fully-assembled, layered probe packet.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Vec<u8>,
    layers: LayerOffsets,
    dirty: bool,
}

impl Packet {
    /// Allocate a packet stacking `layers` (outermost first) with `payload_len`
    /// bytes of trailing payload, writing each layer's wire-format defaults.
    ///
    /// Fails with [`PacketError::IncompatibleLayers`] if two consecutive
    /// layers cannot be stacked (e.g. a transport layer directly above
    /// another transport layer).
    pub fn set_protocols(layers: &[Layer], payload_len: usize) -> Result<Self> {
        if layers.is_empty() {
            return Err(PacketError::NoLayers);
        }
        if layers.len() > LayerOffsets::CAPACITY {
            return Err(PacketError::TooManyLayers(layers.len(), LayerOffsets::CAPACITY));
        }
        for window in layers.windows(2) {
            let (lower, upper) = (window[0], window[1]);
            if !upper.compatible_above(lower) {
                return Err(PacketError::IncompatibleLayers { lower, upper });
            }
        }
        let header_total: usize = layers.iter().map(|l| descriptor::header_len(*l)).sum();
        let mut buf = vec![0_u8; header_total + payload_len];
        let mut offsets = LayerOffsets::new();
        let mut offset = 0;
        for (i, layer) in layers.iter().enumerate() {
            let len = descriptor::header_len(*layer);
            descriptor::write_defaults(*layer, &mut buf[offset..offset + len]);
            offsets.push((*layer, offset));
            if let Some(next) = layers.get(i + 1) {
                let proto = ip_protocol_number(*next);
                match layer {
                    Layer::Ipv4 => buf[offset + 9] = proto,
                    Layer::Ipv6 => buf[offset + 6] = proto,
                    _ => {}
                }
            }
            offset += len;
        }
        let mut packet = Self {
            buf,
            layers: offsets,
            dirty: true,
        };
        packet.write_length_fields();
        Ok(packet)
    }

    fn layer_span(&self, index: usize) -> (usize, usize) {
        let (layer, offset) = self.layers[index];
        let len = descriptor::header_len(layer);
        (offset, offset + len)
    }

    fn payload_span(&self) -> (usize, usize) {
        let last = self.layers.last().expect("non-empty layers");
        let start = last.1 + descriptor::header_len(last.0);
        (start, self.buf.len())
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let (s, e) = self.payload_span();
        &self.buf[s..e]
    }

    /// Resize the payload to `n` bytes, zero-filling any growth. Invalidates
    /// checksums until the next [`Packet::finalize`].
    pub fn payload_resize(&mut self, n: usize) {
        let (start, end) = self.payload_span();
        let current = end - start;
        if n > current {
            let insert_at = self.buf.len();
            self.buf.resize(insert_at + (n - current), 0);
        } else if n < current {
            self.buf.truncate(start + n);
        }
        self.dirty = true;
        self.write_length_fields();
    }

    fn write_length_fields(&mut self) {
        let (payload_start, payload_end) = self.payload_span();
        let payload_len = payload_end - payload_start;
        for i in 0..self.layers.len() {
            let (layer, offset) = self.layers[i];
            let is_last = i + 1 == self.layers.len();
            match layer {
                Layer::Ipv4 => {
                    let total = (self.buf.len() - offset) as u16;
                    self.buf[offset + 2..offset + 4].copy_from_slice(&total.to_be_bytes());
                }
                Layer::Ipv6 => {
                    let total = (self.buf.len() - (offset + 40)) as u16;
                    self.buf[offset + 4..offset + 6].copy_from_slice(&total.to_be_bytes());
                }
                Layer::Udp if is_last => {
                    let total = (8 + payload_len) as u16;
                    self.buf[offset + 4..offset + 6].copy_from_slice(&total.to_be_bytes());
                }
                _ => {}
            }
        }
    }

    /// Write `value` into the first layer (searched outermost-first) that
    /// exposes `key`. Integers are stored in network byte order.
    pub fn set_field(&mut self, key: FieldKey, value: FieldValue) -> Result<()> {
        for i in 0..self.layers.len() {
            let (layer, offset) = self.layers[i];
            if let Some(spec) = descriptor::field(layer, key.0) {
                if spec.kind != value.field_type() {
                    return Err(PacketError::TypeMismatch {
                        key,
                        expected: spec.kind,
                        actual: value.field_type(),
                    });
                }
                write_spec(&mut self.buf, offset, spec, &value);
                self.dirty = true;
                return Ok(());
            }
        }
        Err(PacketError::UnknownField(key))
    }

    /// Read the current value of `key` from the first layer exposing it.
    pub fn get_field(&self, key: FieldKey) -> Result<FieldValue> {
        for i in 0..self.layers.len() {
            let (layer, offset) = self.layers[i];
            if let Some(spec) = descriptor::field(layer, key.0) {
                return Ok(read_spec(&self.buf, offset, spec));
            }
        }
        Err(PacketError::UnknownField(key))
    }

    pub fn set_fields(&mut self, fields: &[Field]) -> Result<()> {
        for f in fields {
            self.set_field(f.key, f.value.clone())?;
        }
        Ok(())
    }

    /// Recompute and patch every layer's checksum, bottom layer first.
    ///
    /// For the transport layer this uses the pseudo-header of the
    /// immediately-enclosing IP layer, per RFC 768/793/4443.
    pub fn finalize(&mut self) -> Result<()> {
        let ip_index = self
            .layers
            .iter()
            .position(|(l, _)| l.is_ip())
            .ok_or(PacketError::NoLayers);
        for i in 0..self.layers.len() {
            let (layer, offset) = self.layers[i];
            match layer {
                Layer::Ipv4 => self.finalize_ipv4(offset),
                Layer::Ipv6 => {}
                Layer::Udp | Layer::Tcp => {
                    let ip_index = ip_index?;
                    self.finalize_transport_checksum(ip_index, offset, None);
                }
                Layer::Icmpv4 => self.finalize_icmp(offset, None),
                Layer::Icmpv6 => {
                    let ip_index = ip_index?;
                    self.finalize_transport_checksum(ip_index, offset, None);
                }
            }
        }
        self.dirty = false;
        Ok(())
    }

    fn finalize_ipv4(&mut self, offset: usize) {
        let len = descriptor::header_len(Layer::Ipv4);
        self.buf[offset + 10] = 0;
        self.buf[offset + 11] = 0;
        let checksum = internet_checksum(&self.buf[offset..offset + len]);
        self.buf[offset + 10..offset + 12].copy_from_slice(&checksum.to_be_bytes());
    }

    fn finalize_icmp(&mut self, offset: usize, force_checksum: Option<u16>) {
        self.buf[offset + 2] = 0;
        self.buf[offset + 3] = 0;
        let checksum = force_checksum.unwrap_or_else(|| internet_checksum(&self.buf[offset..]));
        self.buf[offset + 2..offset + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    fn checksum_field_offset(transport_layer: Layer, offset: usize) -> usize {
        match transport_layer {
            Layer::Udp => offset + 6,
            Layer::Tcp => offset + 16,
            Layer::Icmpv6 => offset + 2,
            _ => unreachable!("checksum_field_offset called on non-transport layer"),
        }
    }

    /// Sum of the pseudo-header (RFC 768/793/4443) for the transport layer at
    /// `offset`, folded from the IP layer at `ip_index`.
    fn pseudo_header_sum(&self, ip_index: usize, offset: usize) -> u32 {
        let (ip_layer, ip_offset) = self.layers[ip_index];
        let transport_layer = self.layers.iter().find(|(_, o)| *o == offset).unwrap().0;
        let proto = ip_protocol_number(transport_layer);
        let transport_len = (self.buf.len() - offset) as u32;
        match ip_layer {
            Layer::Ipv4 => {
                let src = self.buf[ip_offset + 12..ip_offset + 16].try_into().unwrap();
                let dst = self.buf[ip_offset + 16..ip_offset + 20].try_into().unwrap();
                pseudo_header_v4(src, dst, proto, transport_len as u16)
            }
            Layer::Ipv6 => {
                let src = self.buf[ip_offset + 8..ip_offset + 24].try_into().unwrap();
                let dst = self.buf[ip_offset + 24..ip_offset + 40].try_into().unwrap();
                pseudo_header_v6(src, dst, proto, transport_len)
            }
            _ => unreachable!(),
        }
    }

    /// Recompute the UDP/TCP/ICMPv6 checksum using the pseudo-header from the
    /// IP layer at `ip_index`. If `force_checksum` is `Some`, the checksum
    /// field is set to that value directly (used by [`Packet::set_flow_id`]
    /// once the compensator bytes have already been solved for).
    fn finalize_transport_checksum(
        &mut self,
        ip_index: usize,
        offset: usize,
        force_checksum: Option<u16>,
    ) {
        let transport_layer = self.layers.iter().find(|(_, o)| *o == offset).unwrap().0;
        let checksum_field_offset = Self::checksum_field_offset(transport_layer, offset);
        self.buf[checksum_field_offset] = 0;
        self.buf[checksum_field_offset + 1] = 0;

        let checksum = if let Some(c) = force_checksum {
            c
        } else {
            let pseudo = self.pseudo_header_sum(ip_index, offset);
            let body = partial_sum(&self.buf[offset..]);
            !fold_sum(pseudo + body)
        };
        self.buf[checksum_field_offset..checksum_field_offset + 2]
            .copy_from_slice(&checksum.to_be_bytes());
    }

    /// Write the flow identifier for this packet's transport layer.
    ///
    /// - UDP: solves for two checksum-compensator bytes at the start of the
    ///   payload so the UDP checksum field equals `flow_id` exactly. This is
    ///   Paris-traceroute's defining trick: the compensator keeps the rest of
    ///   the 5-tuple untouched while the checksum itself carries the flow id.
    /// - TCP: the checksum lies outside the 8 bytes an ICMP Time-Exceeded
    ///   quotes back, so the flow id is written into the initial sequence
    ///   number instead, then the checksum is recomputed normally.
    /// - ICMP: written into the echo `sequence` field.
    ///
    /// Only the transport layer is re-finalized; the IP header checksum is
    /// untouched.
    pub fn set_flow_id(&mut self, flow_id: u16) -> Result<()> {
        let ip_index = self
            .layers
            .iter()
            .position(|(l, _)| l.is_ip())
            .ok_or(PacketError::NoLayers)?;
        let (transport_index, transport_layer) = self
            .layers
            .iter()
            .enumerate()
            .find(|(_, (l, _))| l.is_transport())
            .map(|(i, (l, _))| (i, *l))
            .ok_or(PacketError::NoFlowCarryingLayer)?;
        let offset = self.layers[transport_index].1;

        match transport_layer {
            Layer::Udp => {
                let (payload_start, payload_end) = self.payload_span();
                if payload_end - payload_start < 2 {
                    self.payload_resize(2);
                }
                let (payload_start, _) = self.payload_span();
                // Zero the compensator bytes and the checksum field before
                // summing, so the solved compensator accounts for nothing
                // but the fixed part of the packet.
                self.buf[payload_start] = 0;
                self.buf[payload_start + 1] = 0;
                let checksum_field_offset = Self::checksum_field_offset(Layer::Udp, offset);
                self.buf[checksum_field_offset] = 0;
                self.buf[checksum_field_offset + 1] = 0;

                let pseudo = self.pseudo_header_sum(ip_index, offset);
                let body = partial_sum(&self.buf[offset..]);
                let fixed_sum = fold_sum(pseudo + body);
                let desired = !flow_id; // fold(fixed_sum + compensator) must equal this
                let compensator = fold_sum(u32::from(desired) + u32::from(!fixed_sum));
                self.buf[payload_start..payload_start + 2]
                    .copy_from_slice(&compensator.to_be_bytes());

                // The compensator was solved to make the checksum equal
                // `flow_id` exactly; write it directly rather than re-summing
                // (avoids the 0x0000/0xFFFF ones'-complement alias at the edges).
                self.finalize_transport_checksum(ip_index, offset, Some(flow_id));
            }
            Layer::Tcp => {
                self.buf[offset + 4..offset + 8].copy_from_slice(&u32::from(flow_id).to_be_bytes());
                self.finalize_transport_checksum(ip_index, offset, None);
            }
            Layer::Icmpv4 => {
                self.buf[offset + 6..offset + 8].copy_from_slice(&flow_id.to_be_bytes());
                self.finalize_icmp(offset, None);
            }
            Layer::Icmpv6 => {
                self.buf[offset + 6..offset + 8].copy_from_slice(&flow_id.to_be_bytes());
                self.finalize_transport_checksum(ip_index, offset, None);
            }
            _ => return Err(PacketError::NoFlowCarryingLayer),
        }
        Ok(())
    }

    /// Read back the value most recently written by [`Packet::set_flow_id`].
    pub fn flow_id(&self) -> Result<u16> {
        let (_, transport_layer) = self
            .layers
            .iter()
            .enumerate()
            .find(|(_, (l, _))| l.is_transport())
            .map(|(i, (l, _))| (i, *l))
            .ok_or(PacketError::NoFlowCarryingLayer)?;
        let offset = self.layers.iter().find(|(l, _)| *l == transport_layer).unwrap().1;
        match transport_layer {
            Layer::Udp | Layer::Icmpv6 => {
                let checksum_offset = if transport_layer == Layer::Udp { offset + 6 } else { offset + 2 };
                Ok(u16::from_be_bytes([self.buf[checksum_offset], self.buf[checksum_offset + 1]]))
            }
            Layer::Tcp => Ok(u16::from_be_bytes([self.buf[offset + 6], self.buf[offset + 7]])),
            Layer::Icmpv4 => Ok(u16::from_be_bytes([self.buf[offset + 6], self.buf[offset + 7]])),
            _ => Err(PacketError::NoFlowCarryingLayer),
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn layers(&self) -> impl Iterator<Item = Layer> + '_ {
        self.layers.iter().map(|(l, _)| *l)
    }
}

// IPv6's first 4 bytes pack version(4)|traffic_class(8)|flow_label(20) across
// byte boundaries that don't line up with any of `FieldValue`'s native
// widths, so `traffic_class` (U8) and `flow_label` (U32) both need
// mask-and-preserve writes rather than a whole-byte/word overwrite, or they
// clobber the version nibble and each other.

fn write_spec(buf: &mut [u8], offset: usize, spec: &descriptor::FieldSpec, value: &FieldValue) {
    let at = offset + spec.offset;
    match value {
        FieldValue::U4(v) | FieldValue::U8(v) => {
            if spec.key.0 == "traffic_class" {
                buf[at] = (buf[at] & 0xF0) | ((*v >> 4) & 0x0F);
                buf[at + 1] = (buf[at + 1] & 0x0F) | ((*v & 0x0F) << 4);
            } else {
                buf[at] = *v;
            }
        }
        FieldValue::U16(v) => buf[at..at + 2].copy_from_slice(&v.to_be_bytes()),
        FieldValue::U32(v) => {
            if spec.key.0 == "flow_label" {
                // 20 bits: low nibble of byte 1, then bytes 2 and 3 whole.
                buf[at + 1] = (buf[at + 1] & 0xF0) | (((*v >> 16) & 0x0F) as u8);
                buf[at + 2] = ((*v >> 8) & 0xFF) as u8;
                buf[at + 3] = (*v & 0xFF) as u8;
            } else {
                buf[at..at + 4].copy_from_slice(&v.to_be_bytes());
            }
        }
        FieldValue::V4(b) => buf[at..at + 4].copy_from_slice(b),
        FieldValue::V6(b) => buf[at..at + 16].copy_from_slice(b),
        FieldValue::Bytes(b) => buf[at..at + b.len().min(spec.size)].copy_from_slice(b),
        FieldValue::String(_) => {}
    }
}

fn read_spec(buf: &[u8], offset: usize, spec: &descriptor::FieldSpec) -> FieldValue {
    let at = offset + spec.offset;
    match spec.kind {
        crate::field::FieldType::U4 | crate::field::FieldType::U8 => {
            if spec.key.0 == "traffic_class" {
                let high = (buf[at] & 0x0F) << 4;
                let low = buf[at + 1] >> 4;
                FieldValue::U8(high | low)
            } else {
                FieldValue::U8(buf[at])
            }
        }
        crate::field::FieldType::U16 => {
            FieldValue::U16(u16::from_be_bytes([buf[at], buf[at + 1]]))
        }
        crate::field::FieldType::U32 => {
            if spec.key.0 == "flow_label" {
                let high = u32::from(buf[at + 1] & 0x0F);
                let mid = u32::from(buf[at + 2]);
                let low = u32::from(buf[at + 3]);
                FieldValue::U32((high << 16) | (mid << 8) | low)
            } else {
                FieldValue::U32(u32::from_be_bytes([
                    buf[at],
                    buf[at + 1],
                    buf[at + 2],
                    buf[at + 3],
                ]))
            }
        }
        crate::field::FieldType::V4 => {
            FieldValue::V4(buf[at..at + 4].try_into().unwrap())
        }
        crate::field::FieldType::V6 => {
            FieldValue::V6(buf[at..at + 16].try_into().unwrap())
        }
        crate::field::FieldType::Bytes => FieldValue::Bytes(buf[at..at + spec.size].to_vec()),
        crate::field::FieldType::String => FieldValue::String(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldValue;

    fn udp_packet(payload_len: usize) -> Packet {
        Packet::set_protocols(&[Layer::Ipv4, Layer::Udp], payload_len).unwrap()
    }

    #[test]
    fn rejects_unknown_layer_stack() {
        let err = Packet::set_protocols(&[Layer::Udp, Layer::Tcp], 0).unwrap_err();
        assert!(matches!(err, PacketError::IncompatibleLayers { .. }));
    }

    #[test]
    fn rejects_too_many_layers() {
        let layers = [Layer::Ipv4; 5];
        let err = Packet::set_protocols(&layers, 0).unwrap_err();
        assert!(matches!(err, PacketError::TooManyLayers(5, 4)));
    }

    #[test]
    fn set_and_get_field_roundtrip() {
        let mut p = udp_packet(4);
        p.set_field(FieldKey("ttl"), FieldValue::U8(7)).unwrap();
        p.set_field(FieldKey("src_port"), FieldValue::U16(33457)).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.get_field(FieldKey("ttl")).unwrap(), FieldValue::U8(7));
        assert_eq!(
            p.get_field(FieldKey("src_port")).unwrap(),
            FieldValue::U16(33457)
        );
    }

    #[test]
    fn unknown_field_errors() {
        let mut p = udp_packet(4);
        assert!(matches!(
            p.set_field(FieldKey("nope"), FieldValue::U8(1)),
            Err(PacketError::UnknownField(_))
        ));
    }

    #[test]
    fn type_mismatch_errors() {
        let mut p = udp_packet(4);
        assert!(matches!(
            p.set_field(FieldKey("ttl"), FieldValue::U16(1)),
            Err(PacketError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn flow_id_compensator_roundtrips_for_udp() {
        for flow in [1_u16, 0x1234, 0x7fff, 0xfffe] {
            let mut p = udp_packet(4);
            p.finalize().unwrap();
            p.set_flow_id(flow).unwrap();
            assert_eq!(p.flow_id().unwrap(), flow, "flow id {flow:#x} did not roundtrip");
        }
    }

    #[test]
    fn flow_id_roundtrips_for_tcp_sequence() {
        let mut p = Packet::set_protocols(&[Layer::Ipv4, Layer::Tcp], 0).unwrap();
        p.finalize().unwrap();
        p.set_flow_id(0xBEEF).unwrap();
        assert_eq!(p.flow_id().unwrap(), 0xBEEF);
    }

    #[test]
    fn payload_resize_grows_and_shrinks() {
        let mut p = udp_packet(0);
        assert_eq!(p.payload().len(), 0);
        p.payload_resize(10);
        assert_eq!(p.payload().len(), 10);
        p.payload_resize(2);
        assert_eq!(p.payload().len(), 2);
    }

    #[test]
    fn ipv6_traffic_class_preserves_version_nibble() {
        let mut p = Packet::set_protocols(&[Layer::Ipv6, Layer::Udp], 4).unwrap();
        p.set_field(FieldKey("traffic_class"), FieldValue::U8(0xAB)).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.as_bytes()[0] & 0xF0, 0x60);
        assert_eq!(p.get_field(FieldKey("traffic_class")).unwrap(), FieldValue::U8(0xAB));
    }

    #[test]
    fn ipv6_flow_label_preserves_version_and_traffic_class() {
        let mut p = Packet::set_protocols(&[Layer::Ipv6, Layer::Udp], 4).unwrap();
        p.set_field(FieldKey("traffic_class"), FieldValue::U8(0x12)).unwrap();
        p.set_field(FieldKey("flow_label"), FieldValue::U32(0xABCDE)).unwrap();
        p.finalize().unwrap();
        assert_eq!(p.as_bytes()[0] & 0xF0, 0x60);
        assert_eq!(
            p.get_field(FieldKey("traffic_class")).unwrap(),
            FieldValue::U8(0x12),
            "setting flow_label must not clobber traffic_class"
        );
        assert_eq!(
            p.get_field(FieldKey("flow_label")).unwrap(),
            FieldValue::U32(0xABCDE)
        );
    }
}
