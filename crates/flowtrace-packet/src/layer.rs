use std::fmt;

/// A protocol layer name accepted by [`crate::packet::Packet::set_protocols`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Ipv4,
    Ipv6,
    Udp,
    Tcp,
    Icmpv4,
    Icmpv6,
}

impl Layer {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Icmpv4 => "icmpv4",
            Self::Icmpv6 => "icmpv6",
        }
    }

    #[must_use]
    pub const fn from_name(name: &str) -> Option<Self> {
        match name.as_bytes() {
            b"ipv4" => Some(Self::Ipv4),
            b"ipv6" => Some(Self::Ipv6),
            b"udp" => Some(Self::Udp),
            b"tcp" => Some(Self::Tcp),
            b"icmpv4" => Some(Self::Icmpv4),
            b"icmpv6" => Some(Self::Icmpv6),
            _ => None,
        }
    }

    /// Is `self` a valid layer to stack directly above `lower`?
    ///
    /// An IP layer may be followed by any transport; a transport layer may
    /// not be followed by another transport.
    #[must_use]
    pub const fn compatible_above(self, lower: Self) -> bool {
        match lower {
            Self::Ipv4 | Self::Ipv6 => true,
            Self::Udp | Self::Tcp | Self::Icmpv4 | Self::Icmpv6 => false,
        }
    }

    #[must_use]
    pub const fn is_ip(self) -> bool {
        matches!(self, Self::Ipv4 | Self::Ipv6)
    }

    #[must_use]
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::Udp | Self::Tcp | Self::Icmpv4 | Self::Icmpv6)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
