use flowtrace_packet::MatchingKey;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while validating a [`crate::config::Config`] before the
/// event loop starts (§7: configuration errors abort before the loop
/// starts, they are never delivered as algorithm events).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("icmp tracing does not use ports, but src-port or dst-port was set")]
    PortsSetForIcmp,

    #[error("both -4 and -6 were given")]
    ConflictingIpFamily,

    #[error("more than one explicit transport flag (-I/-T/-U) was given")]
    ConflictingTransport,

    #[error("max-ttl must be in 1..=255, got {0}")]
    InvalidMaxTtl(u8),

    #[error("num-probes must be >= 1, got {0}")]
    InvalidNumProbes(u32),

    #[error("mda-confidence must be in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

/// The top-level error type for the probing engine, layering the lower
/// crates' errors the way the teacher's `TracerError` wraps socket and
/// packet failures.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not resolve destination address {0}")]
    AddressUnresolved(String),

    #[error(transparent)]
    Net(#[from] flowtrace_net::NetError),

    #[error("protocol unsupported: {0}")]
    Protocol(#[from] flowtrace_packet::error::PacketError),

    #[error("no raw-socket sender configured for destination {0}")]
    NoSenderForDestination(IpAddr),

    #[error("event loop interrupted")]
    LoopInterrupted,

    /// A newly-sent probe's matching key collided with an outstanding one.
    /// Recoverable and diagnostic only: the loop keeps running, the older
    /// probe keeps the key, and this is surfaced to the caller alongside
    /// [`crate::event::LoopEvent::MatchCollision`] rather than aborting.
    #[error("matching key collision, oldest probe kept: {key:?}")]
    MatchCollision { key: MatchingKey },
}

pub type Result<T> = std::result::Result<T, CoreError>;
