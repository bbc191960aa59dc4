use std::net::IpAddr;
use thiserror::Error;

/// Errors raised by the raw-socket sender/sniffer (component C3).
#[derive(Debug, Error)]
pub enum NetError {
    #[error("permission denied opening a raw socket (requires CAP_NET_RAW or root)")]
    PermissionDenied(#[source] std::io::Error),

    #[error("failed to send probe to {addr} after {attempts} attempts")]
    SendFailed {
        addr: IpAddr,
        attempts: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported address family for this socket")]
    UnsupportedFamily,
}

pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Classify a raw socket-creation I/O error, turning `EPERM`/`EACCES`
    /// into [`NetError::PermissionDenied`] per the error design in §7.
    #[must_use]
    pub fn from_socket_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied => Self::PermissionDenied(err),
            _ => Self::Io(err),
        }
    }
}
