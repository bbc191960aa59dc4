use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The address family of an [`Address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

/// A tagged IPv4 or IPv6 address.
///
/// Immutable once constructed; formats to its canonical textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl Address {
    #[must_use]
    pub const fn family(&self) -> Family {
        match self {
            Self::V4(_) => Family::V4,
            Self::V6(_) => Family::V6,
        }
    }

    #[must_use]
    pub const fn octets(&self) -> &[u8] {
        match self {
            Self::V4(b) => b,
            Self::V6(b) => b,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::V4(_) => 4,
            Self::V6(_) => 16,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The sentinel address used for the "star" node in a [`crate::probe`] lattice.
    #[must_use]
    pub const fn star(family: Family) -> Self {
        match family {
            Family::V4 => Self::V4([0, 0, 0, 0]),
            Family::V6 => Self::V6([0; 16]),
        }
    }

    #[must_use]
    pub fn is_star(&self) -> bool {
        self.octets().iter().all(|b| *b == 0)
    }
}

impl From<Ipv4Addr> for Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self::V4(addr.octets())
    }
}

impl From<Ipv6Addr> for Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self::V6(addr.octets())
    }
}

impl From<IpAddr> for Address {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::from(v4),
            IpAddr::V6(v6) => Self::from(v6),
        }
    }
}

impl From<Address> for IpAddr {
    fn from(addr: Address) -> Self {
        match addr {
            Address::V4(b) => Self::V4(Ipv4Addr::from(b)),
            Address::V6(b) => Self::V6(Ipv6Addr::from(b)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V4(b) => write!(f, "{}", Ipv4Addr::from(b)),
            Self::V6(b) => write!(f, "{}", Ipv6Addr::from(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_roundtrip() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let addr = Address::from(ip);
        assert_eq!(addr.family(), Family::V4);
        assert_eq!(IpAddr::from(addr), ip);
        assert_eq!(addr.to_string(), "10.0.0.5");
    }

    #[test]
    fn v6_roundtrip() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        let addr = Address::from(ip);
        assert_eq!(addr.family(), Family::V6);
        assert_eq!(IpAddr::from(addr), ip);
    }

    #[test]
    fn star_is_star() {
        assert!(Address::star(Family::V4).is_star());
        assert!(!Address::from("1.2.3.4".parse::<IpAddr>().unwrap()).is_star());
    }
}
