//! Small newtype wrappers used throughout the algorithms, so a TTL can never
//! be silently passed where a sequence number or flow id was expected.

use derive_more::{Add, AddAssign, Display, From};

/// An IP TTL / hop limit, 1..=255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Add, AddAssign)]
pub struct TimeToLive(pub u8);

/// Monotonically increasing probe sequence number, unique for the lifetime
/// of an algorithm instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Add, AddAssign)]
pub struct Sequence(pub u32);

/// The ICMP identifier shared by every probe an instance sends (ICMP mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Display)]
pub struct TraceId(pub u16);

/// The flow identifier carried by a probe's checksum-compensator (UDP),
/// initial sequence number (TCP) or echo sequence (ICMP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Display)]
pub struct FlowId(pub u16);

/// Which round of probing this probe belongs to, for callers that re-run
/// the algorithm repeatedly against the same destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Display, Add, AddAssign)]
pub struct Round(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_increments() {
        let mut ttl = TimeToLive(1);
        ttl += TimeToLive(1);
        assert_eq!(ttl, TimeToLive(2));
    }

    #[test]
    fn displays_as_inner_value() {
        assert_eq!(FlowId(4242).to_string(), "4242");
    }
}
