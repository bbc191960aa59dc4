//! The configuration record (§6): plain data, validated once before the
//! event loop starts. No process-wide mutable options, unlike the source's
//! global option table (§9 Design Notes).

use crate::error::ConfigError;
use std::net::IpAddr;
use std::time::Duration;

/// Default UDP ports (`-U` not given): destination swept per probe starting
/// here, per traceroute convention.
pub const DEFAULT_UDP_SRC_PORT: u16 = 33456;
pub const DEFAULT_UDP_DST_PORT: u16 = 33457;
/// Destination port used when `-U` selects classic UDP traceroute.
pub const UDP_DST_PORT_CLASSIC: u16 = 53;

pub const DEFAULT_TCP_SRC_PORT: u16 = 16449;
pub const DEFAULT_TCP_DST_PORT: u16 = 16963;
/// Destination port used when `-T` selects HTTP-style TCP traceroute.
pub const TCP_DST_PORT_HTTP: u16 = 80;

pub const DEFAULT_MAX_TTL: u8 = 30;
pub const DEFAULT_NUM_PROBES: u32 = 3;
pub const DEFAULT_PER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MIN_INTER_SEND: Duration = Duration::from_millis(0);
pub const DEFAULT_MDA_CONFIDENCE: f64 = 0.05;
pub const DEFAULT_MDA_MAX_BRANCH: usize = 16;

/// Which address family to probe with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    /// Guess from the destination address.
    #[default]
    Auto,
    V4,
    V6,
}

/// The transport protocol carrying probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Icmp,
}

/// Which algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    ParisTraceroute,
    Mda,
}

/// An explicit transport selection, corresponding to the `-I`/`-T`/`-U`
/// command-line flags. Mutually exclusive with each other; takes precedence
/// over `--protocol` when present (§9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplicitTransport {
    Icmp,
    Tcp,
    Udp,
}

impl From<ExplicitTransport> for Protocol {
    fn from(t: ExplicitTransport) -> Self {
        match t {
            ExplicitTransport::Icmp => Self::Icmp,
            ExplicitTransport::Tcp => Self::Tcp,
            ExplicitTransport::Udp => Self::Udp,
        }
    }
}

/// The full, validated configuration for one algorithm instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub destination: IpAddr,
    /// The local address probes are sent from. Resolving this from the
    /// outbound interface is the address-family auto-detection collaborator
    /// named out of scope in §1; the core takes it as given.
    pub source: IpAddr,
    pub ip_family: IpFamily,
    pub protocol: Protocol,
    /// Set when the caller passed an explicit `-I`/`-T`/`-U` flag rather than
    /// `--protocol`; used only during validation to enforce precedence.
    pub explicit_transport: Option<ExplicitTransport>,
    pub src_port: u16,
    pub dst_port: u16,
    pub algorithm: AlgorithmKind,
    pub max_ttl: u8,
    pub num_probes: u32,
    pub per_probe_timeout: Duration,
    pub min_inter_send: Duration,
    pub mda_confidence: f64,
    pub mda_max_branch: usize,
}

impl Config {
    #[must_use]
    pub fn new(source: IpAddr, destination: IpAddr, protocol: Protocol, algorithm: AlgorithmKind) -> Self {
        let (src_port, dst_port) = match protocol {
            Protocol::Udp => (DEFAULT_UDP_SRC_PORT, DEFAULT_UDP_DST_PORT),
            Protocol::Tcp => (DEFAULT_TCP_SRC_PORT, DEFAULT_TCP_DST_PORT),
            Protocol::Icmp => (0, 0),
        };
        Self {
            destination,
            source,
            ip_family: IpFamily::Auto,
            protocol,
            explicit_transport: None,
            src_port,
            dst_port,
            algorithm,
            max_ttl: DEFAULT_MAX_TTL,
            num_probes: DEFAULT_NUM_PROBES,
            per_probe_timeout: DEFAULT_PER_PROBE_TIMEOUT,
            min_inter_send: DEFAULT_MIN_INTER_SEND,
            mda_confidence: DEFAULT_MDA_CONFIDENCE,
            mda_max_branch: DEFAULT_MDA_MAX_BRANCH,
        }
    }

    /// Resolve `--protocol` vs an explicit `-I`/`-T`/`-U` flag, enforcing the
    /// precedence rule from §9's Open Questions: an explicit transport flag
    /// wins over `--protocol`, and giving more than one explicit flag is
    /// `CONFIG_INVALID`.
    pub fn resolve_transport(&mut self, explicit: &[ExplicitTransport]) -> Result<(), ConfigError> {
        match explicit {
            [] => Ok(()),
            [one] => {
                self.explicit_transport = Some(*one);
                self.protocol = Protocol::from(*one);
                Ok(())
            }
            _ => Err(ConfigError::ConflictingTransport),
        }
    }

    /// Resolve the `-4`/`-6` flags into an [`IpFamily`]. Giving both is
    /// `CONFIG_INVALID` per §8's boundary behaviors.
    pub fn resolve_ip_family(&mut self, v4: bool, v6: bool) -> Result<(), ConfigError> {
        self.ip_family = match (v4, v6) {
            (true, true) => return Err(ConfigError::ConflictingIpFamily),
            (true, false) => IpFamily::V4,
            (false, true) => IpFamily::V6,
            (false, false) => IpFamily::Auto,
        };
        Ok(())
    }

    /// Validate every invariant from §6/§8: port use against ICMP, the `-4
    /// -6` conflict, and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.protocol, Protocol::Icmp) && (self.src_port != 0 || self.dst_port != 0) {
            return Err(ConfigError::PortsSetForIcmp);
        }
        if self.max_ttl == 0 {
            return Err(ConfigError::InvalidMaxTtl(self.max_ttl));
        }
        if self.num_probes == 0 {
            return Err(ConfigError::InvalidNumProbes(self.num_probes));
        }
        if !(self.mda_confidence > 0.0 && self.mda_confidence < 1.0) {
            return Err(ConfigError::InvalidConfidence(self.mda_confidence));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::new(
            "10.0.0.2".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            Protocol::Udp,
            AlgorithmKind::ParisTraceroute,
        )
    }

    #[test]
    fn icmp_with_ports_is_invalid() {
        let mut cfg = base();
        cfg.protocol = Protocol::Icmp;
        cfg.src_port = 1234;
        assert_eq!(cfg.validate(), Err(ConfigError::PortsSetForIcmp));
    }

    #[test]
    fn zero_max_ttl_is_invalid() {
        let mut cfg = base();
        cfg.max_ttl = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidMaxTtl(0)));
    }

    #[test]
    fn two_explicit_transports_conflict() {
        let mut cfg = base();
        let err = cfg
            .resolve_transport(&[ExplicitTransport::Tcp, ExplicitTransport::Udp])
            .unwrap_err();
        assert_eq!(err, ConfigError::ConflictingTransport);
    }

    #[test]
    fn explicit_transport_overrides_protocol() {
        let mut cfg = base();
        cfg.resolve_transport(&[ExplicitTransport::Tcp]).unwrap();
        assert_eq!(cfg.protocol, Protocol::Tcp);
    }

    #[test]
    fn conflicting_ip_family_flags_are_invalid() {
        let mut cfg = base();
        assert_eq!(
            cfg.resolve_ip_family(true, true),
            Err(ConfigError::ConflictingIpFamily)
        );
    }

    #[test]
    fn out_of_range_confidence_is_invalid() {
        let mut cfg = base();
        cfg.mda_confidence = 1.5;
        assert!(cfg.validate().is_err());
    }
}
