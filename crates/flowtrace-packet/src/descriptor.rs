//! Static, process-wide protocol descriptors: header length, named fields
//! with their byte offset and size, and default-value writers. None of this
//! is exposed to callers of [`crate::packet::Packet`] — only [`crate::packet`]
//! reaches into these tables.

use crate::field::{FieldKey, FieldType};
use crate::layer::Layer;

/// Where a named field lives within a layer's header.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub kind: FieldType,
    pub offset: usize,
    pub size: usize,
}

const fn spec(name: &'static str, kind: FieldType, offset: usize, size: usize) -> FieldSpec {
    FieldSpec {
        key: FieldKey(name),
        kind,
        offset,
        size,
    }
}

/// Fixed header length of a layer, assuming no IPv4/TCP options.
#[must_use]
pub const fn header_len(layer: Layer) -> usize {
    match layer {
        Layer::Ipv4 => 20,
        Layer::Ipv6 => 40,
        Layer::Udp => 8,
        Layer::Tcp => 20,
        Layer::Icmpv4 | Layer::Icmpv6 => 8,
    }
}

const IPV4_FIELDS: &[FieldSpec] = &[
    spec("dscp", FieldType::U8, 1, 1),
    spec("total_length", FieldType::U16, 2, 2),
    spec("identification", FieldType::U16, 4, 2),
    spec("flags_fragment_offset", FieldType::U16, 6, 2),
    spec("ttl", FieldType::U8, 8, 1),
    spec("protocol", FieldType::U8, 9, 1),
    spec("checksum", FieldType::U16, 10, 2),
    spec("src", FieldType::V4, 12, 4),
    spec("dst", FieldType::V4, 16, 4),
];

const IPV6_FIELDS: &[FieldSpec] = &[
    spec("traffic_class", FieldType::U8, 0, 4),
    spec("flow_label", FieldType::U32, 0, 4),
    spec("payload_length", FieldType::U16, 4, 2),
    spec("next_header", FieldType::U8, 6, 1),
    spec("ttl", FieldType::U8, 7, 1),
    spec("src", FieldType::V6, 8, 16),
    spec("dst", FieldType::V6, 24, 16),
];

const UDP_FIELDS: &[FieldSpec] = &[
    spec("src_port", FieldType::U16, 0, 2),
    spec("dst_port", FieldType::U16, 2, 2),
    spec("length", FieldType::U16, 4, 2),
    spec("checksum", FieldType::U16, 6, 2),
];

const TCP_FIELDS: &[FieldSpec] = &[
    spec("src_port", FieldType::U16, 0, 2),
    spec("dst_port", FieldType::U16, 2, 2),
    spec("sequence", FieldType::U32, 4, 4),
    spec("ack", FieldType::U32, 8, 4),
    spec("flags", FieldType::U8, 13, 1),
    spec("window", FieldType::U16, 14, 2),
    spec("checksum", FieldType::U16, 16, 2),
    spec("urgent_pointer", FieldType::U16, 18, 2),
];

const ICMPV4_FIELDS: &[FieldSpec] = &[
    spec("icmp_type", FieldType::U8, 0, 1),
    spec("icmp_code", FieldType::U8, 1, 1),
    spec("checksum", FieldType::U16, 2, 2),
    spec("identifier", FieldType::U16, 4, 2),
    spec("sequence", FieldType::U16, 6, 2),
];

const ICMPV6_FIELDS: &[FieldSpec] = &[
    spec("icmp_type", FieldType::U8, 0, 1),
    spec("icmp_code", FieldType::U8, 1, 1),
    spec("checksum", FieldType::U16, 2, 2),
    spec("identifier", FieldType::U16, 4, 2),
    spec("sequence", FieldType::U16, 6, 2),
];

#[must_use]
pub const fn fields(layer: Layer) -> &'static [FieldSpec] {
    match layer {
        Layer::Ipv4 => IPV4_FIELDS,
        Layer::Ipv6 => IPV6_FIELDS,
        Layer::Udp => UDP_FIELDS,
        Layer::Tcp => TCP_FIELDS,
        Layer::Icmpv4 => ICMPV4_FIELDS,
        Layer::Icmpv6 => ICMPV6_FIELDS,
    }
}

#[must_use]
pub fn field(layer: Layer, key: &str) -> Option<&'static FieldSpec> {
    fields(layer).iter().find(|f| f.key.0 == key)
}

/// Write a layer's wire-format defaults into `buf`, which must be at least
/// `header_len(layer)` bytes.
pub fn write_defaults(layer: Layer, buf: &mut [u8]) {
    match layer {
        Layer::Ipv4 => {
            buf[0] = 0x45; // version 4, IHL 5 (20 bytes, no options)
            buf[8] = 64; // default ttl, overwritten per-probe
            buf[9] = 17; // protocol, overwritten by set_protocols caller via "protocol" field
        }
        Layer::Ipv6 => {
            buf[0] = 0x60; // version 6
            buf[7] = 64; // default hop limit
        }
        Layer::Tcp => {
            buf[12] = 5 << 4; // data offset: 5 words, no options
            buf[13] = 0x02; // SYN
            buf[14..16].copy_from_slice(&14600_u16.to_be_bytes());
        }
        Layer::Icmpv4 => {
            buf[0] = 8; // echo request
        }
        Layer::Icmpv6 => {
            buf[0] = 128; // echo request
        }
        Layer::Udp => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lengths_match_wire_format() {
        assert_eq!(header_len(Layer::Ipv4), 20);
        assert_eq!(header_len(Layer::Ipv6), 40);
        assert_eq!(header_len(Layer::Udp), 8);
        assert_eq!(header_len(Layer::Tcp), 20);
        assert_eq!(header_len(Layer::Icmpv4), 8);
    }

    #[test]
    fn udp_first_8_bytes_cover_all_fields() {
        for f in UDP_FIELDS {
            assert!(f.offset + f.size <= 8, "field {} escapes 8-byte quote", f.key);
        }
    }

    #[test]
    fn lookup_unknown_field_is_none() {
        assert!(field(Layer::Udp, "bogus").is_none());
    }
}
